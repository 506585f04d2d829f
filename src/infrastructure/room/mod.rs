//! Remote room integration: access tokens and the embedded room link

pub mod client;
pub mod token;

pub use client::{signal_url, RoomLink};
pub use token::{
    new_access_token, AccessTokenIssuer, GrantClaims, TokenVerifier, VideoGrant,
    DEFAULT_TOKEN_TTL,
};
