mod traits;
pub use traits::*;
pub mod utils;

mod activation;
pub use activation::{Act, ActivationKind};
mod linear;
pub use linear::linear;
mod mlp;
pub use mlp::Mlp;

mod gcn;
pub use gcn::GcnConv;
mod gin;
pub use gin::GinConv;
mod gat;
pub use gat::GatConv;

mod encoder;
pub use encoder::{EncoderParams, GnnEncoder, GnnType};
