pub mod endpoint;
pub mod object;
pub mod path;
pub mod poll;
