pub mod text;
pub use text::{pretty_print, strip_markup};
