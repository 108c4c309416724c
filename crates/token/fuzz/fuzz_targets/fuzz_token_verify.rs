//! Fuzz target for location token verification.
//!
//! Feeds arbitrary strings to the verifier. Every result must be `Ok` or a
//! `TokenError`; panics and hangs are bugs. Inputs that happen to verify
//! must carry a recognized location.

#![no_main]

use std::sync::LazyLock;

use keyward_token::{LocationTokenService, TokenConfig};
use libfuzzer_sys::fuzz_target;

static SERVICE: LazyLock<Option<LocationTokenService>> = LazyLock::new(|| {
    let config = TokenConfig::builder()
        .secret("fuzzing-secret-0123456789abcdef0123".to_owned())
        .build()
        .ok()?;
    LocationTokenService::new(&config).ok()
});

fuzz_target!(|data: &[u8]| {
    // Tokens are always UTF-8 text.
    let Ok(token) = std::str::from_utf8(data) else {
        return;
    };
    let Some(service) = SERVICE.as_ref() else {
        return;
    };

    if let Ok(scan) = service.verify(token) {
        assert!(service.locations().contains(&scan.location));
    }
});
