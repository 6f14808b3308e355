//! Parsers for the text printed by OS network tools
//!
//! Each function takes the raw output of one tool and returns a typed value,
//! or nothing when the output does not contain what we look for. None of them
//! fail: unexpected formats simply yield no result.

use serde_json::Value;
use std::net::Ipv4Addr;

/// What the routing table says about the default route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultRoute {
    pub interface: Option<String>,
    pub gateway: Option<Ipv4Addr>,
}

impl DefaultRoute {
    fn is_empty(&self) -> bool {
        self.interface.is_none() && self.gateway.is_none()
    }
}

/// An interface and the IPv4 addresses bound to it, in listing order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterfaceAddrs {
    pub name: String,
    pub ipv4: Vec<Ipv4Addr>,
    /// Next hops listed for this adapter (Windows `ipconfig` only)
    pub gateways: Vec<Ipv4Addr>,
}

/// The engine allocates its TUN addresses from 198.18.0.0/16
pub fn is_tun_address(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 198 && octets[1] == 18
}

/// First non-loopback address
pub fn first_usable_ipv4(addrs: &[Ipv4Addr]) -> Option<Ipv4Addr> {
    addrs.iter().copied().find(|ip| !ip.is_loopback() && !ip.is_unspecified())
}

/// Name of the first interface holding an address in the TUN block
pub fn find_tun_interface(interfaces: &[InterfaceAddrs]) -> Option<String> {
    interfaces
        .iter()
        .find(|iface| iface.ipv4.iter().any(is_tun_address))
        .map(|iface| iface.name.clone())
}

/// Addresses of one named interface
pub fn addrs_of<'a>(interfaces: &'a [InterfaceAddrs], name: &str) -> Option<&'a InterfaceAddrs> {
    interfaces.iter().find(|iface| iface.name == name)
}

/// Parse an address token that may carry a prefix (`10.0.0.1/24`), a scope
/// suffix or an `addr:` label (old net-tools)
fn parse_ipv4_token(token: &str) -> Option<Ipv4Addr> {
    let token = token.strip_prefix("addr:").unwrap_or(token);
    let token = token.split('/').next()?;
    let token = token.split('%').next()?;
    token.trim().parse().ok()
}

/// Value following a keyword in a whitespace separated token list
fn token_after<'a>(tokens: &[&'a str], keyword: &str) -> Option<&'a str> {
    tokens
        .iter()
        .position(|t| *t == keyword)
        .and_then(|i| tokens.get(i + 1))
        .copied()
}

// === Linux: iproute2 ===

/// `ip -json route show default`
pub fn parse_ip_route_json(output: &str) -> Option<DefaultRoute> {
    let json: Value = serde_json::from_str(output.trim()).ok()?;
    let routes = json.as_array()?;

    // Prefer a route that names a gateway, otherwise take the first one
    let route = routes
        .iter()
        .find(|r| r.get("gateway").is_some())
        .or_else(|| routes.first())?;

    let result = DefaultRoute {
        interface: route.get("dev").and_then(|v| v.as_str()).map(String::from),
        gateway: route.get("gateway").and_then(|v| v.as_str()).and_then(parse_ipv4_token),
    };
    if result.is_empty() { None } else { Some(result) }
}

/// `ip route show default`
///
/// Token order differs between kernels and route types
/// (`default via 192.168.1.1 dev eth0` vs `default dev wg0 scope link`), so
/// keywords are looked up instead of positions.
pub fn parse_ip_route_text(output: &str) -> Option<DefaultRoute> {
    let mut fallback = None;

    for line in output.lines() {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() != Some(&"default") {
            continue;
        }

        let route = DefaultRoute {
            interface: token_after(&tokens, "dev").map(String::from),
            gateway: token_after(&tokens, "via").and_then(parse_ipv4_token),
        };
        if route.gateway.is_some() && route.interface.is_some() {
            return Some(route);
        }
        if fallback.is_none() && !route.is_empty() {
            fallback = Some(route);
        }
    }

    fallback
}

/// `ip -json addr`
pub fn parse_ip_addr_json(output: &str) -> Option<Vec<InterfaceAddrs>> {
    let json: Value = serde_json::from_str(output.trim()).ok()?;
    let arr = json.as_array()?;

    let mut interfaces = Vec::with_capacity(arr.len());
    for iface in arr {
        let name = match iface.get("ifname").and_then(|v| v.as_str()) {
            Some(name) => name.to_string(),
            None => continue,
        };

        let mut ipv4 = Vec::new();
        if let Some(addr_info) = iface.get("addr_info").and_then(|v| v.as_array()) {
            for addr in addr_info {
                if addr.get("family").and_then(|v| v.as_str()) != Some("inet") {
                    continue;
                }
                if let Some(ip) = addr.get("local").and_then(|v| v.as_str()).and_then(parse_ipv4_token) {
                    ipv4.push(ip);
                }
            }
        }

        interfaces.push(InterfaceAddrs { name, ipv4, gateways: Vec::new() });
    }

    Some(interfaces)
}

/// `ip addr show`
pub fn parse_ip_addr_text(output: &str) -> Vec<InterfaceAddrs> {
    let mut interfaces: Vec<InterfaceAddrs> = Vec::new();

    for line in output.lines() {
        // "3: utun0: <...>" - header lines start with the interface index
        if line.starts_with(|c: char| c.is_ascii_digit()) {
            let mut parts = line.splitn(3, ':');
            let _index = parts.next();
            if let Some(name) = parts.next() {
                // veth pairs show up as "veth1@if5"
                let name = name.trim().split('@').next().unwrap_or("").to_string();
                if !name.is_empty() {
                    interfaces.push(InterfaceAddrs { name, ..Default::default() });
                }
            }
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() == Some(&"inet") {
            if let (Some(current), Some(ip)) = (interfaces.last_mut(), tokens.get(1).and_then(|t| parse_ipv4_token(t))) {
                current.ipv4.push(ip);
            }
        }
    }

    interfaces
}

// === BSD / macOS ===

/// `route -n get default`
pub fn parse_route_get(output: &str) -> Option<DefaultRoute> {
    let mut route = DefaultRoute::default();

    for line in output.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("interface:") {
            let value = value.trim();
            if !value.is_empty() {
                route.interface = Some(value.to_string());
            }
        } else if let Some(value) = line.strip_prefix("gateway:") {
            route.gateway = parse_ipv4_token(value.trim());
        }
    }

    if route.is_empty() { None } else { Some(route) }
}

/// `ifconfig` (all interfaces or a single one)
pub fn parse_ifconfig(output: &str) -> Vec<InterfaceAddrs> {
    let mut interfaces: Vec<InterfaceAddrs> = Vec::new();

    for line in output.lines() {
        if line.trim().is_empty() {
            continue;
        }

        // Block headers are not indented: "en0: flags=8863<UP,...> mtu 1500"
        // (net-tools on Linux prints "eth0      Link encap:Ethernet")
        if !line.starts_with(|c: char| c.is_whitespace()) {
            let name = line
                .split(|c: char| c == ':' || c.is_whitespace())
                .next()
                .unwrap_or("")
                .to_string();
            if !name.is_empty() {
                interfaces.push(InterfaceAddrs { name, ..Default::default() });
            }
            continue;
        }

        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.first() == Some(&"inet") {
            if let (Some(current), Some(ip)) = (interfaces.last_mut(), tokens.get(1).and_then(|t| parse_ipv4_token(t))) {
                current.ipv4.push(ip);
            }
        }
    }

    interfaces
}

/// `ifconfig <name>` reports an attached link
pub fn ifconfig_is_active(output: &str) -> bool {
    output.lines().any(|line| line.trim() == "status: active")
}

/// `sysctl -n <key>` for a boolean key
pub fn parse_sysctl_flag(output: &str) -> Option<bool> {
    // `sysctl -n` prints just the value, `sysctl <key>` prints "key: value"
    let value = output.trim().rsplit(|c: char| c == ':' || c == '=').next()?.trim();
    match value {
        "1" => Some(true),
        "0" => Some(false),
        _ => None,
    }
}

// === Windows ===

/// Labels that mark the default gateway entry of an `ipconfig` block, across
/// the display languages we have seen
const GATEWAY_LABELS: &[&str] = &["gateway", "passerelle", "puerta de enlace", "网关", "閘道"];

/// `ipconfig`
///
/// Labels are translated per display language, so addresses are recognised
/// by their value; labels only tell the IPv4 entry apart from the subnet
/// mask and the gateway.
pub fn parse_ipconfig(output: &str) -> Vec<InterfaceAddrs> {
    let mut adapters: Vec<InterfaceAddrs> = Vec::new();
    let mut in_gateway = false;

    for raw in output.lines() {
        let line = raw.trim_end();
        if line.trim().is_empty() {
            continue;
        }

        if !line.starts_with(|c: char| c.is_whitespace()) {
            in_gateway = false;
            if let Some(header) = line.strip_suffix(':') {
                adapters.push(InterfaceAddrs {
                    name: adapter_name(header),
                    ..Default::default()
                });
            }
            continue;
        }

        let current = match adapters.last_mut() {
            Some(current) => current,
            None => continue,
        };

        let entry = line.split_once(" : ").or_else(|| line.split_once(": "));
        match entry {
            Some((label, value)) => {
                let label = label.to_lowercase();
                let value = strip_annotation(value);
                in_gateway = GATEWAY_LABELS.iter().any(|g| label.contains(g));

                if in_gateway {
                    if let Some(ip) = parse_ipv4_token(value) {
                        current.gateways.push(ip);
                    }
                } else if label.contains("ipv4") {
                    if let Some(ip) = parse_ipv4_token(value) {
                        current.ipv4.push(ip);
                    }
                }
            }
            // Continuation line of a multi-valued gateway entry
            None if in_gateway => {
                if let Some(ip) = parse_ipv4_token(strip_annotation(line)) {
                    current.gateways.push(ip);
                }
            }
            None => {}
        }
    }

    adapters
}

/// "Ethernet adapter Ethernet 2" -> "Ethernet 2"
fn adapter_name(header: &str) -> String {
    let header = header.trim();
    let lower = header.to_lowercase();
    if let Some(idx) = lower.find("adapter ") {
        return header[idx + "adapter ".len()..].trim().to_string();
    }
    if let Some((_, name)) = header.split_once("适配器 ") {
        return name.trim().to_string();
    }
    header.to_string()
}

/// Drop "(Preferred)"-style annotations after a value
fn strip_annotation(value: &str) -> &str {
    value.split('(').next().unwrap_or("").trim()
}

/// `route print 0.0.0.0`
pub fn parse_route_print_gateway(output: &str) -> Option<Ipv4Addr> {
    output.lines().find_map(|line| {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() >= 3 && fields[0] == "0.0.0.0" && fields[1] == "0.0.0.0" {
            // "On-link" routes have no next hop
            parse_ipv4_token(fields[2])
        } else {
            None
        }
    })
}

/// `netsh interface ipv4 show global`
pub fn parse_netsh_forwarding(output: &str) -> Option<bool> {
    for line in output.lines() {
        let (key, value) = match line.split_once(':') {
            Some(kv) => kv,
            None => continue,
        };
        let key = key.trim().to_lowercase();
        let value = value.trim().to_lowercase();

        let is_forwarding_key = (key == "forwarding" || key == "ip forwarding" || key.ends_with("转发"))
            && !key.contains("multicast")
            && !key.contains("多播");
        if !is_forwarding_key {
            continue;
        }

        if value.starts_with("enabled") || value.contains("启用") {
            return Some(true);
        }
        if value.starts_with("disabled") || value.contains("禁用") {
            return Some(false);
        }
    }
    None
}
