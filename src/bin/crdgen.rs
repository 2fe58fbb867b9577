use kube::CustomResourceExt;
use optimism_k8s::crd::{OpBatcher, OpChallenger, OpNode, OpProposer, OptimismNetwork};

fn main() {
    let crds = [
        serde_yaml::to_string(&OptimismNetwork::crd()),
        serde_yaml::to_string(&OpNode::crd()),
        serde_yaml::to_string(&OpBatcher::crd()),
        serde_yaml::to_string(&OpProposer::crd()),
        serde_yaml::to_string(&OpChallenger::crd()),
    ];
    for crd in crds {
        match crd {
            Ok(yaml) => println!("---\n{yaml}"),
            Err(e) => {
                eprintln!("failed to serialize CRD: {e}");
                std::process::exit(1);
            }
        }
    }
}
