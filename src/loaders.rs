pub mod gtfs;
pub mod metro;
pub mod source;
