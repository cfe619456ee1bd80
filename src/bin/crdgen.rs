//! # CRD Generator
//!
//! Prints the CustomResourceDefinitions of `OneAgent` and `OneAgentApm` as a
//! multi-document YAML stream.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin crdgen > config/crd/oneagent.yaml
//! cargo run --bin crdgen | kubectl apply -f -
//! ```

use kube::core::CustomResourceExt;
use oneagent_operator::crd::{OneAgent, OneAgentApm};

fn main() {
    let crds = [OneAgent::crd(), OneAgentApm::crd()];

    println!("# This file is auto-generated by crdgen");
    println!("# DO NOT EDIT THIS FILE MANUALLY");
    println!("# Fix the Rust types in src/crd/ instead, the file is overwritten on every regeneration");
    for crd in &crds {
        match serde_yaml::to_string(crd) {
            Ok(yaml) => {
                println!("---");
                print!("{yaml}");
            }
            Err(e) => {
                eprintln!("Failed to serialize CRD to YAML: {e}");
                std::process::exit(1);
            }
        }
    }
}
