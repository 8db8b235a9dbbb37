//! Bearer-token authentication for the engine listeners.
//!
//! [`JwtSecret`] holds the shared HMAC key, [`validate_bearer`] checks one
//! `Authorization` header value against it, and [`AuthGate`] decides per
//! request whether that check runs at all.

mod exemption;
mod gate;
mod secret;
mod validator;

pub use {
    exemption::protected_methods,
    gate::{AuthGate, ExemptionPredicate, GateDecision, GateError, RequestMeta},
    secret::{Claims, JwtSecret, JwtSecretError},
    validator::{AuthError, validate_bearer},
};
