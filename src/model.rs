pub mod feature;
pub mod gtfs;
pub mod metro;

pub use feature::*;
pub use gtfs::*;
pub use metro::*;
