pub(crate) mod lenient;

mod pii;
pub use pii::Pii;
