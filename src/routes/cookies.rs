// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Session cookies.
//!
//! `xsrf_token` is the only cookie script can read; the frontend echoes it
//! in the `X-XSRF-TOKEN` header. Everything else is `HttpOnly` and
//! `SameSite=Strict`.

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};

use crate::config::Config;
use crate::services::SessionTokens;

pub const ACCESS_TOKEN_COOKIE: &str = "access_token";
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";
pub const XSRF_COOKIE: &str = "xsrf_token";
pub const XSRF_SAME_SITE_COOKIE: &str = "xsrf_token_same_site";
pub const XSRF_HEADER: &str = "x-xsrf-token";

const SESSION_COOKIES: [&str; 4] = [
    ACCESS_TOKEN_COOKIE,
    REFRESH_TOKEN_COOKIE,
    XSRF_COOKIE,
    XSRF_SAME_SITE_COOKIE,
];

/// Lifetime of the refresh and XSRF cookies.
const LONG_LIVED_DAYS: i64 = 30;

/// Cookie attributes for the current deployment.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// `None` in local development so cookies bind to the serving host.
    domain: Option<String>,
    secure: bool,
    xsrf_same_site: SameSite,
    access_max_age: time::Duration,
}

impl CookieSettings {
    pub fn from_config(config: &Config) -> Self {
        let local = config.is_local();
        Self {
            domain: (!local).then(|| config.cookie_domain.clone()),
            secure: !local,
            // Browsers reject SameSite=None without Secure.
            xsrf_same_site: if local { SameSite::Lax } else { SameSite::None },
            access_max_age: time::Duration::seconds(config.auth_token_ttl().num_seconds()),
        }
    }

    fn cookie(
        &self,
        name: &'static str,
        value: String,
        http_only: bool,
        same_site: SameSite,
        max_age: time::Duration,
    ) -> Cookie<'static> {
        let mut cookie = Cookie::build((name, value))
            .path("/")
            .secure(self.secure)
            .http_only(http_only)
            .same_site(same_site)
            .max_age(max_age)
            .build();
        if let Some(domain) = &self.domain {
            cookie.set_domain(domain.clone());
        }
        cookie
    }

    /// Set all four session cookies.
    pub fn set_session(&self, jar: CookieJar, session: &SessionTokens) -> CookieJar {
        let long_lived = time::Duration::days(LONG_LIVED_DAYS);
        jar.add(self.cookie(
            ACCESS_TOKEN_COOKIE,
            session.access_token.clone(),
            true,
            SameSite::Strict,
            self.access_max_age,
        ))
        .add(self.cookie(
            REFRESH_TOKEN_COOKIE,
            session.refresh_token.clone(),
            true,
            SameSite::Strict,
            long_lived,
        ))
        .add(self.cookie(
            XSRF_COOKIE,
            session.xsrf_token.clone(),
            false,
            self.xsrf_same_site,
            long_lived,
        ))
        .add(self.cookie(
            XSRF_SAME_SITE_COOKIE,
            session.xsrf_token.clone(),
            true,
            SameSite::Strict,
            long_lived,
        ))
    }

    /// Expire all session cookies, whether or not the request carried them.
    pub fn clear_session(&self, jar: CookieJar) -> CookieJar {
        SESSION_COOKIES.iter().fold(jar, |jar, name| {
            let mut cookie = self.cookie(
                *name,
                String::new(),
                *name != XSRF_COOKIE,
                SameSite::Strict,
                time::Duration::ZERO,
            );
            cookie.make_removal();
            jar.add(cookie)
        })
    }
}
