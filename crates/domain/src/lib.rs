pub mod clock;
pub mod entities;
pub mod executor;
pub mod messaging;
pub mod repositories;
pub mod value_objects;

pub use clock::*;
pub use entities::*;
pub use executor::*;
pub use messaging::*;
pub use repositories::*;
pub use taskflow_errors::{TaskflowError, TaskflowResult};
pub use value_objects::*;
