mod influence;
pub use influence::*;

mod synthetic;
pub use synthetic::*;

mod loader;
pub use loader::*;

mod traits;
pub use traits::*;

mod utils;
pub use utils::*;
