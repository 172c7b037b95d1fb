//! REST adapters for the non-storage services flextk talks to.
//!
//! Every client is built from explicit settings, owns its HTTP client and
//! accepts a base URL override so it can run against a mock server.

pub mod firebase_auth;
pub mod firestore;
pub mod keycloak;
pub mod stripe;
pub mod unsplash;

pub use firebase_auth::{FirebaseAuth, UserPage, UserRecord};
pub use firestore::{Document, Firestore};
pub use keycloak::{is_token_expired, KeycloakClient, RoleScope, TokenSet};
pub use stripe::{PaymentIntent, PaymentIntentParams, Refund, RefundReason, StripeClient};
pub use unsplash::{Photo, PhotoSize, SearchResults, UnsplashClient};
