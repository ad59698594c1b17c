//! 选择对局域网内其它设备可达的本机 IPv4 地址。

use std::io;
use std::net::{IpAddr, Ipv4Addr};
use tracing::debug;

/// 名称中带这些关键字的网卡通常是 VPN 或虚拟网卡。
const VIRTUAL_ADAPTER_KEYWORDS: &[&str] = &[
    "radmin",
    "vpn",
    "virtualbox",
    "vmware",
    "hyper-v",
    "wintun",
    "wireguard",
    "tailscale",
    "zerotier",
    "hamachi",
    "tap",
    "tun",
    "utun",
    "docker",
    "vethernet",
    "loopback",
];

const WIRELESS_KEYWORDS: &[&str] = &["wlan", "wi-fi", "wifi", "wireless"];

fn is_private(ip: Ipv4Addr) -> bool {
    let [a, b, ..] = ip.octets();
    a == 10 || (a == 172 && (16..=31).contains(&b)) || (a == 192 && b == 168)
}

/// 为候选地址打分，不可用的地址返回 `None`。
pub fn score_candidate(interface: &str, ip: Ipv4Addr) -> Option<i32> {
    if ip.is_loopback() || ip.is_link_local() || ip.is_unspecified() {
        return None;
    }
    let name = interface.to_lowercase();
    let octets = ip.octets();
    let mut score = 0;
    if is_private(ip) {
        score += 100;
    }
    if octets[0] == 192 && octets[1] == 168 {
        score += 5;
        // VirtualBox host-only 默认网段
        if octets[2] == 56 {
            score -= 50;
        }
    }
    if WIRELESS_KEYWORDS.iter().any(|keyword| name.contains(keyword)) {
        score += 40;
    }
    if name.contains("ethernet") {
        score += 5;
    }
    if VIRTUAL_ADAPTER_KEYWORDS
        .iter()
        .any(|keyword| name.contains(keyword))
    {
        score -= 1000;
    }
    Some(score)
}

/// 在候选中选分数最高者，同分时保留先出现的。
pub fn pick_best<'a, I>(candidates: I) -> Option<Ipv4Addr>
where
    I: IntoIterator<Item = (&'a str, Ipv4Addr)>,
{
    let mut best: Option<(i32, Ipv4Addr)> = None;
    for (name, ip) in candidates {
        let Some(score) = score_candidate(name, ip) else {
            continue;
        };
        debug!(interface = name, ip = %ip, score, "address candidate");
        if best.is_none_or(|(best_score, _)| score > best_score) {
            best = Some((score, ip));
        }
    }
    best.map(|(_, ip)| ip)
}

/// 枚举本机网卡并返回最适合对外展示的 IPv4 地址。
pub fn local_ipv4() -> io::Result<Option<IpAddr>> {
    let interfaces = if_addrs::get_if_addrs()?;
    let candidates = interfaces.iter().filter_map(|interface| {
        if interface.is_loopback() {
            return None;
        }
        match interface.ip() {
            IpAddr::V4(ip) => Some((interface.name.as_str(), ip)),
            IpAddr::V6(_) => None,
        }
    });
    Ok(pick_best(candidates).map(IpAddr::V4))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_wireless_lan_over_virtual_adapters() {
        let best = pick_best([
            ("vEthernet (WSL)", Ipv4Addr::new(172, 20, 0, 1)),
            ("VirtualBox Host-Only", Ipv4Addr::new(192, 168, 56, 1)),
            ("Ethernet", Ipv4Addr::new(10, 0, 0, 8)),
            ("Wi-Fi", Ipv4Addr::new(192, 168, 1, 23)),
        ]);
        assert_eq!(best, Some(Ipv4Addr::new(192, 168, 1, 23)));
    }

    #[test]
    fn host_only_subnet_is_penalized() {
        let host_only = score_candidate("eth1", Ipv4Addr::new(192, 168, 56, 1)).expect("score");
        let lan = score_candidate("eth0", Ipv4Addr::new(10, 1, 2, 3)).expect("score");
        assert!(lan > host_only);
    }

    #[test]
    fn skips_loopback_and_link_local() {
        assert_eq!(score_candidate("lo", Ipv4Addr::LOCALHOST), None);
        assert_eq!(score_candidate("eth0", Ipv4Addr::new(169, 254, 3, 4)), None);
        assert_eq!(
            pick_best([("lo", Ipv4Addr::LOCALHOST)]),
            None
        );
    }

    #[test]
    fn public_addresses_still_qualify() {
        assert_eq!(
            pick_best([("eth0", Ipv4Addr::new(203, 0, 113, 9))]),
            Some(Ipv4Addr::new(203, 0, 113, 9))
        );
    }
}
