// Input checks, no side effects
pub mod validation;

// Collaborators injected into the pipeline
pub mod audit;
pub mod notifications;
pub mod payment_gateway;

// Order pipeline
pub mod checkout;
pub mod payment_verification;
pub mod renewals;
