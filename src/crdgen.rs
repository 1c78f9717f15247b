//! # CRD Generator
//!
//! Prints the Decofile CRD as YAML for `kubectl apply -f -`.

use kube::CustomResourceExt;

fn main() {
    print!(
        "{}",
        serde_yaml::to_string(&decofile_operator::crd::Decofile::crd())
            .expect("Failed to serialize Decofile CRD")
    );
}
