//! # Vault Reflector
//!
//! Continuously copies secrets from HashiCorp Vault into Kubernetes Secrets.
//!
//! - [`auth`]: obtains a Vault token from a static token, GCE identity, or the pod's service account
//! - [`reflector`]: reconciles Vault paths onto labelled Kubernetes Secrets
//! - [`runtime`]: the refresh loop and its status gauge
//!
//! Supporting modules: [`config`], [`vault`], [`cluster`], [`observability`], [`server`], [`cli`].

pub mod auth;
pub mod cli;
pub mod cluster;
pub mod config;
pub mod constants;
pub mod observability;
pub mod reflector;
pub mod runtime;
pub mod server;
pub mod vault;
