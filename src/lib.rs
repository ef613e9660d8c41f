#![forbid(unsafe_code)]

pub mod assemble;
pub mod build;
pub mod cli;
pub mod config;
pub mod epub;
pub mod error;
pub mod fetch;
pub mod fic;
pub mod formats;
pub mod logging;
pub mod normalize;
pub mod page;
pub mod sanitize;
pub mod site;
