// pbind — typed parameter binding and the bounds-query protocol
//
// Library root. Parameter handles and expressions come first, then the
// buffer runtime, then the demo pipelines and harness, then the
// declaration front end used by the CLI.

pub mod ast;
pub mod diag;
pub mod expr;
pub mod id;
pub mod lexer;
pub mod parser;
pub mod types;

pub mod argument;
pub mod buffer;
pub mod image_param;
pub mod param;
pub mod parameter;

pub mod allocator;
pub mod bounds_query;
pub mod descriptor;
pub mod runtime;

pub mod config;
pub mod demos;
pub mod harness;

pub mod header;
pub mod signature;
