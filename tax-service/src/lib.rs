//! Tax Service - Vehicle import tax estimation (ISV, IVA, IUC) as a microservice.

pub mod calculation;
pub mod config;
pub mod dtos;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod services;
pub mod startup;
