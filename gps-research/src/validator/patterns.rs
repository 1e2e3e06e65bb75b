//! Body markers for soft 404s, login walls and bot challenges.

use aho_corasick::AhoCorasick;
use once_cell::sync::Lazy;

/// Phrases that mean "this page does not exist" even under a 200.
pub const SOFT_404_MARKERS: &[&str] = &[
    "page not found",
    "<title>404",
    "404 not found",
    "uh oh",
    "doesn't exist",
    "does not exist",
    "moved elsewhere",
    "not what you were looking for",
    "sorry, we couldn't find",
    "the requested page could not be found",
    "the page you requested",
    "this page doesn't exist",
    "error 404",
];

/// Phrases that mean the content sits behind authentication.
pub const LOGIN_WALL_MARKERS: &[&str] = &[
    "sign in - google accounts",
    "use your google account",
    "sign in to continue",
    "please log in",
    "authentication required",
    "single sign-on",
    "sso login",
    "you need to sign in",
];

static SOFT_404: Lazy<AhoCorasick> = Lazy::new(|| build_matcher(SOFT_404_MARKERS));
static LOGIN_WALL: Lazy<AhoCorasick> = Lazy::new(|| build_matcher(LOGIN_WALL_MARKERS));

fn build_matcher(patterns: &[&str]) -> AhoCorasick {
    AhoCorasick::builder()
        .ascii_case_insensitive(true)
        .build(patterns)
        .unwrap()
}

/// First soft-404 marker found in `body`, if any.
pub fn find_soft_404(body: &str) -> Option<&'static str> {
    SOFT_404
        .find(body)
        .map(|m| SOFT_404_MARKERS[m.pattern().as_usize()])
}

/// First login-wall marker found in `body`, if any.
pub fn find_login_wall(body: &str) -> Option<&'static str> {
    LOGIN_WALL
        .find(body)
        .map(|m| LOGIN_WALL_MARKERS[m.pattern().as_usize()])
}

/// Cloudflare's JavaScript interstitial.
pub fn is_cloudflare_challenge(body_lower: &str) -> bool {
    body_lower.contains("just a moment...") && body_lower.contains("enable javascript")
}

/// A generic "access denied" page, unless it also names the entity itself.
pub fn is_access_denied(body_lower: &str, entity: &str) -> bool {
    if !body_lower.contains("access denied") {
        return false;
    }
    let entity = entity.trim().to_lowercase();
    entity.is_empty() || !body_lower.contains(&entity)
}
