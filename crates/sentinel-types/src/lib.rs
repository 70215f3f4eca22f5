mod instance;
mod outcome;
mod user;

pub use instance::*;
pub use outcome::*;
pub use user::*;
