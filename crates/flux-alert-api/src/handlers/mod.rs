pub mod alerts;
pub mod inbox;
pub mod settings;

pub use alerts::*;
pub use inbox::*;
pub use settings::*;
