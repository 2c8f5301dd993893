//! Indicator defanging: neutralise URLs, IP addresses and e-mail addresses.
//!
//! Threat-intelligence reports are full of live indicators. Once converted
//! to Markdown they end up in wikis, tickets and search indexes where a
//! stray click or an auto-linker can resolve them. Defanging rewrites the
//! separators of each indicator (`http` → `hxxp`, `.` → `[.]`, `@` → `[@]`,
//! `:` → `[:]`) so the text stays readable but inert.
//!
//! ## Rule Order
//!
//! Rule families run in a fixed order. Schemes go first so the host rule
//! can anchor on the defanged scheme and only touch dots inside URL hosts;
//! e-mail and IP rules then see hosts that are already bracketed and leave
//! them alone.
//!
//! ## Idempotence
//!
//! Every rule brackets separators and never re-brackets one that is
//! already wrapped in `[` `]`, and no rule's output matches any rule's
//! input pattern. `defang(defang(x)) == defang(x)` therefore holds for all
//! inputs. File hashes contain neither dots, colons nor `@` and are never
//! modified.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::net::Ipv6Addr;

/// One family of defang substitutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefangRule {
    /// `http://` → `hxxp://`, `ftp://` → `fxp://`, …
    Schemes,
    /// Dots in the host of a URL → `[.]`.
    UrlHosts,
    /// `user@example.com` → `user[@]example[.]com`, also for IPv4 hosts.
    Emails,
    /// `10.0.0.1` → `10[.]0[.]0[.]1`.
    Ipv4,
    /// `2001:db8::1` → `2001[:]db8[:][:]1`.
    Ipv6,
    /// `evil.com` in running text → `evil[.]com`.
    BareDomains,
}

impl DefangRule {
    /// Application order. Schemes must precede every dot rule.
    pub const ORDER: [DefangRule; 6] = [
        DefangRule::Schemes,
        DefangRule::UrlHosts,
        DefangRule::Emails,
        DefangRule::Ipv4,
        DefangRule::Ipv6,
        DefangRule::BareDomains,
    ];
}

/// Which rule families a [`Defanger`] applies.
///
/// Bare-domain matching is off by default: without a scheme in front,
/// `report.pdf` and `example.com` are hard to tell apart and the
/// false-positive rate on ordinary prose is high.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefangPolicy {
    pub schemes: bool,
    pub url_hosts: bool,
    pub emails: bool,
    pub ipv4: bool,
    pub ipv6: bool,
    pub bare_domains: bool,
}

impl Default for DefangPolicy {
    fn default() -> Self {
        Self {
            schemes: true,
            url_hosts: true,
            emails: true,
            ipv4: true,
            ipv6: true,
            bare_domains: false,
        }
    }
}

impl DefangPolicy {
    /// Every rule family, including bare domains.
    pub fn strict() -> Self {
        Self {
            bare_domains: true,
            ..Self::default()
        }
    }

    /// Enabled rule families in application order.
    pub fn rules(&self) -> Vec<DefangRule> {
        DefangRule::ORDER
            .into_iter()
            .filter(|rule| self.enabled(*rule))
            .collect()
    }

    fn enabled(&self, rule: DefangRule) -> bool {
        match rule {
            DefangRule::Schemes => self.schemes,
            DefangRule::UrlHosts => self.url_hosts,
            DefangRule::Emails => self.emails,
            DefangRule::Ipv4 => self.ipv4,
            DefangRule::Ipv6 => self.ipv6,
            DefangRule::BareDomains => self.bare_domains,
        }
    }
}

/// Applies a [`DefangPolicy`] to text.
#[derive(Debug, Clone, Default)]
pub struct Defanger {
    policy: DefangPolicy,
}

impl Defanger {
    pub fn new(policy: DefangPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &DefangPolicy {
        &self.policy
    }

    /// Defang `text` with every enabled rule, in order.
    pub fn defang(&self, text: &str) -> String {
        self.policy
            .rules()
            .into_iter()
            .fold(text.to_string(), |acc, rule| apply_rule(rule, &acc))
    }
}

/// Defang with the default policy.
pub fn defang(text: &str) -> String {
    Defanger::default().defang(text)
}

fn apply_rule(rule: DefangRule, text: &str) -> String {
    match rule {
        DefangRule::Schemes => defang_schemes(text),
        DefangRule::UrlHosts => defang_url_hosts(text),
        DefangRule::Emails => defang_emails(text),
        DefangRule::Ipv4 => defang_ipv4(text),
        DefangRule::Ipv6 => defang_ipv6(text),
        DefangRule::BareDomains => defang_bare_domains(text),
    }
}

// ── Rule 1: Schemes ─────────────────────────────────────────────────────────

static RE_SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(https?|s?ftps?)://").unwrap());

/// Every `t` in the scheme becomes `x`, keeping its case:
/// `http` → `hxxp`, `FTP` → `FXP`, `sftp` → `sfxp`.
fn defang_schemes(text: &str) -> String {
    RE_SCHEME
        .replace_all(text, |caps: &regex::Captures| {
            let scheme: String = caps[1]
                .chars()
                .map(|c| match c {
                    't' => 'x',
                    'T' => 'X',
                    other => other,
                })
                .collect();
            format!("{scheme}://")
        })
        .into_owned()
}

// ── Rule 2: URL hosts ───────────────────────────────────────────────────────

static RE_URL_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\b(?:hxxps?|s?fxps?)://([^\s/?#<>"'()|]+)"#).unwrap()
});

fn defang_url_hosts(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for caps in RE_URL_HOST.captures_iter(text) {
        let Some(host) = caps.get(1) else { continue };
        // Sentence punctuation directly after the host is not part of it.
        let trimmed = host
            .as_str()
            .trim_end_matches(|c| matches!(c, '.' | ',' | ';' | ':' | '!'));
        let host_end = host.start() + trimmed.len();
        out.push_str(&text[last..host.start()]);
        // Userinfo (`user@host`) keeps its `@` live otherwise.
        out.push_str(&bracket_separators(&bracket_separators(trimmed, '.'), '@'));
        last = host_end;
    }
    out.push_str(&text[last..]);
    out
}

// ── Rule 3: E-mail addresses ────────────────────────────────────────────────

static RE_EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b[A-Za-z0-9._%+-]+@(?:[A-Za-z0-9-]+(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}|(?:\d{1,3}\.){3}\d{1,3})\b",
    )
    .unwrap()
});

fn defang_emails(text: &str) -> String {
    RE_EMAIL
        .replace_all(text, |caps: &regex::Captures| {
            let email = &caps[0];
            match email.split_once('@') {
                Some((local, domain)) => {
                    format!("{local}[@]{}", bracket_separators(domain, '.'))
                }
                None => email.to_string(),
            }
        })
        .into_owned()
}

// ── Rule 4: IPv4 ────────────────────────────────────────────────────────────

static RE_IPV4: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap());

fn defang_ipv4(text: &str) -> String {
    rewrite_matches(text, &RE_IPV4, |candidate, before, after| {
        // `1.2.3.4.5` is a dotted number, not an address.
        if before.ends_with('.') || starts_with_dot_digit(after) {
            return None;
        }
        let valid = candidate.split('.').all(|octet| octet.parse::<u8>().is_ok());
        valid.then(|| bracket_separators(candidate, '.'))
    })
}

fn starts_with_dot_digit(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next() == Some('.') && chars.next().is_some_and(|c| c.is_ascii_digit())
}

// ── Rule 5: IPv6 ────────────────────────────────────────────────────────────

static RE_IPV6_CANDIDATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)[0-9a-f:]{2,}").unwrap());

fn defang_ipv6(text: &str) -> String {
    rewrite_matches(text, &RE_IPV6_CANDIDATE, |candidate, before, after| {
        let glued = |c: Option<char>| c.is_some_and(|c| c.is_alphanumeric() || c == '_');
        if glued(before.chars().next_back()) || glued(after.chars().next()) {
            return None;
        }
        let colons = candidate.matches(':').count();
        // Plain `h:m:s` times and MAC addresses fail to parse; full
        // addresses have seven colons, compressed ones contain `::`.
        let shaped = candidate.contains("::") || colons == 7;
        if colons < 2 || !shaped || candidate.trim_matches(':').is_empty() {
            return None;
        }
        // `a::b` and `cafe::1` are prose or code, `fe80::1` is an address.
        let numeric_group = candidate
            .split(':')
            .any(|group| group.len() >= 2 && group.bytes().any(|b| b.is_ascii_digit()));
        if colons < 3 && !numeric_group {
            return None;
        }
        candidate
            .parse::<Ipv6Addr>()
            .ok()
            .map(|_| bracket_separators(candidate, ':'))
    })
}

// ── Rule 6: Bare domains ────────────────────────────────────────────────────

static RE_BARE_DOMAIN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b[a-z0-9](?:[a-z0-9-]*[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]*[a-z0-9])?)*\.(?:com|net|org|info|biz|io|co|ru|cn|su|xyz|top|online|site|club|tk|ml|ga|cf|gq|pw|cc|onion)\b",
    )
    .unwrap()
});

fn defang_bare_domains(text: &str) -> String {
    rewrite_matches(text, &RE_BARE_DOMAIN, |candidate, before, _after| {
        // Part of an already-handled e-mail address or path.
        if before.ends_with('@') || before.ends_with('/') || before.ends_with('.') {
            return None;
        }
        Some(bracket_separators(candidate, '.'))
    })
}

// ── Helpers ─────────────────────────────────────────────────────────────────

/// Wrap every `sep` in `s` in brackets unless it already is.
fn bracket_separators(s: &str, sep: char) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 8);
    for (i, &c) in chars.iter().enumerate() {
        let wrapped = i > 0 && chars[i - 1] == '[' && chars.get(i + 1) == Some(&']');
        if c == sep && !wrapped {
            out.push('[');
            out.push(c);
            out.push(']');
        } else {
            out.push(c);
        }
    }
    out
}

/// Replace regex matches for which `f` returns `Some`, keeping the rest.
///
/// `f` receives the match plus the text before and after it so rules can
/// inspect their surroundings (the regex crate has no look-around).
fn rewrite_matches(
    text: &str,
    re: &Regex,
    mut f: impl FnMut(&str, &str, &str) -> Option<String>,
) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;
    for m in re.find_iter(text) {
        if let Some(replacement) = f(m.as_str(), &text[..m.start()], &text[m.end()..]) {
            out.push_str(&text[last..m.start()]);
            out.push_str(&replacement);
            last = m.end();
        }
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROSE: &[&str] = &[
        "The quick brown fox jumps over the lazy dog. It was 3.5 degrees warmer than expected.",
        "Version 2.1.3 of the report was published on 2023-04-01 at 10:30 by the analysts.",
        "In Q4, the U.S. team reviewed 1,204 alerts; e.g. phishing, malware, and fraud.",
        "Meeting notes: see section 4.2, table 7 and the appendix (pages 12-14).",
        "Ratio 16:9 screens and a 12:30:45 timestamp are not addresses.",
        "The SHA-256 digest was e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855.",
    ];

    #[test]
    fn http_scheme_defanged() {
        assert_eq!(defang_schemes("see http://x"), "see hxxp://x");
        assert_eq!(defang_schemes("HTTPS://x"), "HXXPS://x");
        assert_eq!(defang_schemes("ftp://files"), "fxp://files");
        assert_eq!(defang_schemes("sftp://files"), "sfxp://files");
    }

    #[test]
    fn full_url_defanged() {
        assert_eq!(
            defang("Payload at http://evil.example.com/a.php?id=1."),
            "Payload at hxxp://evil[.]example[.]com/a.php?id=1."
        );
    }

    #[test]
    fn url_path_dots_untouched() {
        let out = defang("https://cdn.site.org/js/app.min.js");
        assert_eq!(out, "hxxps://cdn[.]site[.]org/js/app.min.js");
    }

    #[test]
    fn markdown_link_defanged() {
        assert_eq!(
            defang("[C2 panel](http://10.1.2.3:8080/login)"),
            "[C2 panel](hxxp://10[.]1[.]2[.]3:8080/login)"
        );
    }

    #[test]
    fn ipv4_defanged() {
        assert_eq!(defang("Beacon to 192.168.1.10 every 60s"), "Beacon to 192[.]168[.]1[.]10 every 60s");
        assert_eq!(defang("range 10.0.0.0/8."), "range 10[.]0[.]0[.]0/8.");
    }

    #[test]
    fn invalid_ipv4_untouched() {
        assert_eq!(defang("999.1.1.1"), "999.1.1.1");
        assert_eq!(defang("1.2.3.4.5"), "1.2.3.4.5");
    }

    #[test]
    fn ipv6_defanged() {
        assert_eq!(defang("host 2001:db8::1 seen"), "host 2001[:]db8[:][:]1 seen");
        assert_eq!(
            defang("fe80:0:0:0:202:b3ff:fe1e:8329"),
            "fe80[:]0[:]0[:]0[:]202[:]b3ff[:]fe1e[:]8329"
        );
    }

    #[test]
    fn times_and_macs_untouched() {
        assert_eq!(defang("at 12:30:45"), "at 12:30:45");
        assert_eq!(defang("mac 00:1a:2b:3c:4d:5e"), "mac 00:1a:2b:3c:4d:5e");
        assert_eq!(defang("use std::fs;"), "use std::fs;");
    }

    #[test]
    fn short_double_colon_words_untouched() {
        assert_eq!(defang("a::b"), "a::b");
        assert_eq!(defang("see cafe::1 here"), "see cafe::1 here");
        assert_eq!(defang("link-local fe80::1"), "link-local fe80[:][:]1");
        assert_eq!(defang("2001:db8::"), "2001[:]db8[:][:]");
    }

    #[test]
    fn url_userinfo_at_defanged() {
        assert_eq!(defang("http://user@evil.com/x"), "hxxp://user[@]evil[.]com/x");
        assert_eq!(defang("ftp://anon:pw@10.0.0.5/"), "fxp://anon:pw[@]10[.]0[.]0[.]5/");
    }

    #[test]
    fn email_with_ipv4_host_defanged() {
        assert_eq!(defang("ssh root@10.0.0.1 now"), "ssh root[@]10[.]0[.]0[.]1 now");
    }

    #[test]
    fn email_defanged() {
        assert_eq!(
            defang("Contact bad.actor@mail.evil.ru now"),
            "Contact bad.actor[@]mail[.]evil[.]ru now"
        );
    }

    #[test]
    fn hashes_untouched() {
        let md5 = "d41d8cd98f00b204e9800998ecf8427e";
        let sha1 = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
        let text = format!("md5 {md5} sha1 {sha1}");
        assert_eq!(defang(&text), text);
    }

    #[test]
    fn bare_domains_only_with_strict_policy() {
        let text = "Traffic to evil-domain.xyz was blocked.";
        assert_eq!(defang(text), text);
        let strict = Defanger::new(DefangPolicy::strict());
        assert_eq!(strict.defang(text), "Traffic to evil-domain[.]xyz was blocked.");
    }

    #[test]
    fn disabled_rules_do_not_run() {
        let policy = DefangPolicy {
            ipv4: false,
            ..DefangPolicy::default()
        };
        let d = Defanger::new(policy);
        assert_eq!(d.defang("8.8.8.8"), "8.8.8.8");
        assert_eq!(d.defang("http://a.b"), "hxxp://a[.]b");
    }

    #[test]
    fn rule_order_is_fixed() {
        let rules = DefangPolicy::strict().rules();
        assert_eq!(rules.first(), Some(&DefangRule::Schemes));
        assert_eq!(rules.len(), 6);
        assert_eq!(DefangPolicy::default().rules().len(), 5);
    }

    #[test]
    fn prose_is_byte_identical() {
        for paragraph in PROSE {
            assert_eq!(&defang(paragraph), paragraph);
            assert_eq!(&Defanger::new(DefangPolicy::strict()).defang(paragraph), paragraph);
        }
    }

    #[test]
    fn defang_is_idempotent() {
        let samples = [
            "http://evil.com/x and https://1.2.3.4:443/ and ftp://files.example.org",
            "mail root@victim.example.co.uk or admin@10.0.0.1.nip.io",
            "login http://user@evil.com and ssh root@10.0.0.1",
            "v6 ::ffff:192.168.0.1 and 2001:db8:85a3::8a2e:370:7334",
            "already hxxp://evil[.]com and 8[.]8[.]8[.]8 and a[@]b[.]com",
            "mixed http://sub.evil[.]com/path 1.2.3[.]4 evil.top",
            "[link](https://a.b.c/d.e) `10.10.10.10` **http://x.y**",
        ];
        for policy in [DefangPolicy::default(), DefangPolicy::strict()] {
            let d = Defanger::new(policy);
            for s in samples.iter().chain(PROSE.iter()) {
                let once = d.defang(s);
                let twice = d.defang(&once);
                assert_eq!(once, twice, "not idempotent for {s:?}");
            }
        }
    }

    #[test]
    fn bracket_separators_skips_wrapped() {
        assert_eq!(bracket_separators("a.b[.]c", '.'), "a[.]b[.]c");
        assert_eq!(bracket_separators("[.]", '.'), "[.]");
    }
}
