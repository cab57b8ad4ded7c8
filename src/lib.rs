#![allow(clippy::new_without_default)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate anyhow;

pub mod api;
pub mod area_utils;
pub mod config;
pub mod gps_processor;
pub mod logs;
pub mod main_db;
pub mod renderer;
pub mod spot_store;
pub mod utils;
pub mod visited_spot;
