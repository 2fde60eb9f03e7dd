mod interface;

pub use self::interface::{Config, FilterFull, Ip};
