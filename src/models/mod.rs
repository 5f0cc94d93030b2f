mod addon;
mod payment;
mod plan;
mod user;

pub use addon::*;
pub use payment::*;
pub use plan::*;
pub use user::*;
