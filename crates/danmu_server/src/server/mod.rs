#![forbid(unsafe_code)]

pub mod comments;
pub mod gateway;
pub mod health;
pub mod http;
pub mod protocol;
pub mod subscribers;

#[cfg(test)]
mod gateway_tests;
