// SPDX-License-Identifier: LGPL-3.0-only
//
// This file is provided WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY
// or FITNESS FOR A PARTICULAR PURPOSE.

use anyhow::{anyhow, bail, Context, Result};
use url::Url;

/// Transport scheme of a ledger RPC endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RpcScheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl RpcScheme {
    pub fn is_websocket(&self) -> bool {
        matches!(self, RpcScheme::Ws | RpcScheme::Wss)
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, RpcScheme::Https | RpcScheme::Wss)
    }
}

/// A validated RPC endpoint. Submissions and reads go over http(s), so websocket urls are
/// accepted in configuration and converted on demand.
#[derive(Clone, Debug)]
pub struct RpcUrl {
    scheme: RpcScheme,
    url: Url,
}

impl RpcUrl {
    pub fn parse(url: &str) -> Result<Self> {
        let parsed = Url::parse(url).context("Invalid URL format")?;
        let scheme = match parsed.scheme() {
            "http" => RpcScheme::Http,
            "https" => RpcScheme::Https,
            "ws" => RpcScheme::Ws,
            "wss" => RpcScheme::Wss,
            other => bail!("Unsupported rpc scheme '{other}'. Expected http(s):// or ws(s)://"),
        };

        if parsed.host_str().is_none() {
            bail!("RPC URL must contain a host");
        }

        Ok(Self {
            scheme,
            url: parsed,
        })
    }

    pub fn scheme(&self) -> RpcScheme {
        self.scheme
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// The endpoint as an http(s) url
    pub fn as_http_url(&self) -> Result<String> {
        if !self.scheme.is_websocket() {
            return Ok(self.url.to_string());
        }
        let mut parsed = self.url.clone();
        let scheme = if self.scheme.is_secure() {
            "https"
        } else {
            "http"
        };
        parsed
            .set_scheme(scheme)
            .map_err(|_| anyhow!("could not convert {} to {scheme}", self.url))?;
        Ok(parsed.to_string())
    }

    pub fn is_local(&self) -> bool {
        match self.url.host_str() {
            Some("localhost") | Some("127.0.0.1") | Some("::1") | Some("[::1]") => true,
            Some(host) => host.starts_with("127."),
            None => false,
        }
    }
}
