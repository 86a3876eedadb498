//! Configuration parsing for the gateway.
//!
//! The file uses brace blocks of whitespace-separated directives:
//!
//! ```text
//! gateway :5354 {
//!     upstream 8.8.8.8:53
//!     timeout 5s
//!     fanout sequential
//!     cache dns_cache.csv {
//!         ttl 3600
//!         lookup first
//!     }
//!     prometheus :9153
//! }
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use crate::cache::{LookupPolicy, DEFAULT_TTL_SECS};
use crate::resolution::Fanout;
use crate::upstream::DEFAULT_TIMEOUT;

pub const DEFAULT_LISTEN_PORT: u16 = 5354;
pub const DEFAULT_CACHE_FILE: &str = "dns_cache.csv";
const DNS_PORT: u16 = 53;
const METRICS_PORT: u16 = 9153;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Vec<Directive>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// `None` keeps the cache in memory only.
    pub path: Option<PathBuf>,
    pub ttl_seconds: u64,
    pub lookup: LookupPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub listen: SocketAddr,
    pub upstream: SocketAddr,
    pub timeout: Duration,
    pub fanout: Fanout,
    pub cache: CacheConfig,
    pub metrics: Option<SocketAddr>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_LISTEN_PORT),
            upstream: SocketAddr::new(IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)), DNS_PORT),
            timeout: DEFAULT_TIMEOUT,
            fanout: Fanout::Sequential,
            cache: CacheConfig {
                path: Some(PathBuf::from(DEFAULT_CACHE_FILE)),
                ttl_seconds: DEFAULT_TTL_SECS,
                lookup: LookupPolicy::FirstMatch,
            },
            metrics: None,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Token { Text(String), OpenBrace, CloseBrace, Newline }

struct RawBlock { keys: Vec<String>, directives: Vec<Directive> }

impl Config {
    /// Load configuration from a file path. A missing file yields the
    /// defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file '{}' not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let tokens = Self::lex(content);
        let blocks = Self::parse_tokens(&tokens)?;
        let mut cfg = Self::default();

        let block = match blocks.as_slice() {
            [] => return Ok(cfg),
            [block] => block,
            _ => anyhow::bail!("Expected one server block, found {}", blocks.len()),
        };

        for key in &block.keys {
            if key.contains(':') {
                cfg.listen = parse_addr(key, DEFAULT_LISTEN_PORT)?;
            }
        }

        for d in &block.directives {
            match d.name.as_str() {
                "upstream" => {
                    let arg = required_arg(d)?;
                    cfg.upstream = parse_addr(arg, DNS_PORT)?;
                }
                "timeout" => cfg.timeout = parse_duration(required_arg(d)?)?,
                "fanout" => {
                    cfg.fanout = match required_arg(d)? {
                        "sequential" => Fanout::Sequential,
                        "parallel" => Fanout::Parallel,
                        other => anyhow::bail!("Unknown fanout mode '{}'", other),
                    };
                }
                "cache" => cfg.cache = parse_cache(d)?,
                "prometheus" => {
                    let arg = d.args.first().map(String::as_str).unwrap_or(":9153");
                    cfg.metrics = Some(parse_addr(arg, METRICS_PORT)?);
                }
                other => tracing::warn!("Ignoring unknown directive '{}'", other),
            }
        }
        Ok(cfg)
    }

    fn lex(input: &str) -> Vec<Token> {
        let mut tokens = Vec::new();
        let mut chars = input.chars().peekable();
        while let Some(&c) = chars.peek() {
            if c == '\n' { tokens.push(Token::Newline); chars.next(); }
            else if c.is_whitespace() || c == ';' { chars.next(); }
            else if c == '#' { while let Some(&c) = chars.peek() { if c == '\n' { break; } chars.next(); } }
            else if c == '{' { tokens.push(Token::OpenBrace); chars.next(); }
            else if c == '}' { tokens.push(Token::CloseBrace); chars.next(); }
            else if c == '"' {
                chars.next();
                let mut s = String::new();
                while let Some(&c) = chars.peek() { if c == '"' { chars.next(); break; } s.push(c); chars.next(); }
                tokens.push(Token::Text(s));
            } else {
                let mut s = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_whitespace() || c == '#' || c == '{' || c == '}' || c == '"' || c == ';' { break; }
                    s.push(c); chars.next();
                }
                tokens.push(Token::Text(s));
            }
        }
        tokens
    }

    fn parse_tokens(tokens: &[Token]) -> Result<Vec<RawBlock>> {
        let mut i = 0;
        let mut blocks = Vec::new();
        let mut keys = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Text(s) => { keys.push(s.clone()); i += 1; }
                Token::OpenBrace => {
                    i += 1;
                    let (directives, next_i) = Self::parse_block(tokens, i)?;
                    i = next_i;
                    blocks.push(RawBlock { keys: std::mem::take(&mut keys), directives });
                }
                Token::Newline => { i += 1; keys.clear(); }
                Token::CloseBrace => anyhow::bail!("Unexpected '}}' outside of a block"),
            }
        }
        Ok(blocks)
    }

    /// Parse a configuration block starting at position i
    fn parse_block(tokens: &[Token], mut i: usize) -> Result<(Vec<Directive>, usize)> {
        let mut directives = Vec::new();
        while i < tokens.len() {
            match &tokens[i] {
                Token::Newline => { i += 1; }
                Token::CloseBrace => { i += 1; return Ok((directives, i)); }
                Token::Text(name) => {
                    let name = name.clone(); i += 1;
                    let mut args = Vec::new();
                    let mut block = Vec::new();
                    while i < tokens.len() {
                        match &tokens[i] {
                            Token::Text(arg) => { args.push(arg.clone()); i += 1; }
                            Token::OpenBrace => {
                                i += 1;
                                let (sub_block, next_i) = Self::parse_block(tokens, i)?;
                                block = sub_block; i = next_i; break;
                            }
                            Token::Newline | Token::CloseBrace => { break; }
                        }
                    }
                    directives.push(Directive { name, args, block });
                }
                Token::OpenBrace => anyhow::bail!("Block opened without a directive"),
            }
        }
        anyhow::bail!("Unterminated block: missing '}}'")
    }
}

fn required_arg(d: &Directive) -> Result<&str> {
    d.args
        .first()
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("Directive '{}' needs an argument", d.name))
}

fn parse_cache(d: &Directive) -> Result<CacheConfig> {
    let mut cache = Config::default().cache;
    match d.args.first().map(String::as_str) {
        Some("off") => cache.path = None,
        Some(path) => cache.path = Some(PathBuf::from(path)),
        None => {}
    }
    for sub in &d.block {
        match sub.name.as_str() {
            "ttl" => {
                let arg = required_arg(sub)?;
                cache.ttl_seconds = arg.parse().map_err(|e| anyhow::anyhow!("Invalid cache ttl '{}': {}", arg, e))?;
            }
            "lookup" => {
                cache.lookup = match required_arg(sub)? {
                    "first" => LookupPolicy::FirstMatch,
                    "latest" => LookupPolicy::LatestMatch,
                    other => anyhow::bail!("Unknown cache lookup policy '{}'", other),
                };
            }
            other => tracing::warn!("Ignoring unknown cache option '{}'", other),
        }
    }
    Ok(cache)
}

/// Accepts `ip:port`, `ip` (default port) and `:port` (all interfaces).
pub fn parse_addr(s: &str, default_port: u16) -> Result<SocketAddr> {
    let s = s.trim();
    if let Some(port) = s.strip_prefix(':') {
        let port = port.parse::<u16>().map_err(|e| anyhow::anyhow!("Invalid port in '{}': {}", s, e))?;
        return Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port));
    }
    if let Ok(addr) = s.parse::<SocketAddr>() {
        return Ok(addr);
    }
    match s.parse::<IpAddr>() {
        Ok(ip) => Ok(SocketAddr::new(ip, default_port)),
        Err(_) => anyhow::bail!("Invalid address '{}'", s),
    }
}

pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if let Some(stripped) = s.strip_suffix("ms") { Ok(Duration::from_millis(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('s') { Ok(Duration::from_secs(stripped.parse()?)) }
    else if let Some(stripped) = s.strip_suffix('m') { Ok(Duration::from_secs(stripped.parse::<u64>()? * 60)) }
    else if let Ok(secs) = s.parse::<u64>() { Ok(Duration::from_secs(secs)) }
    else { anyhow::bail!("invalid duration '{}'", s) }
}
