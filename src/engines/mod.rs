//! Protocol engines (C6, §4.6): bootstrap, per-server registration, and
//! observation/notification. Each engine takes `now` as an explicit
//! argument rather than reading a global clock (Design Notes: "expose an
//! engine struct that takes `now` as an argument; tests feed synthetic
//! times").

pub mod bootstrap;
pub mod observation;
pub mod registration;
