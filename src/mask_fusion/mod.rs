pub mod dataset;
pub mod edge_weights;
pub mod gmm;
pub mod harness;
pub mod labeling;
pub mod likelihood;
pub mod oracle;
pub mod pipeline;
pub mod scoring;
pub mod solver;
pub mod weak_mask;
