use std::{
    env::{var as env_var, var_os as env_var_os},
    io::{self, Write},
};

const ALL_CFGS: &[&str] = &["select_updates_timeout", "multicast_opts"];

fn main() {
    for cfg in ALL_CFGS {
        println!("cargo:rustc-check-cfg=cfg({cfg})");
    }
    if is_unix() {
        let target = TargetTriplet::fetch();
        collect_select_features(&target);
    }
}

fn is_unix() -> bool {
    env_var_os("CARGO_CFG_UNIX").is_some()
}

/// This can define the following:
/// - `select_updates_timeout`, on platforms whose `select` writes the unslept time back into the
///   `timeval` it was given (Linux and Android). Everywhere else the readiness wait deducts the
///   elapsed time by hand.
/// - `multicast_opts`, where `IP_MULTICAST_LOOP`/`IP_MULTICAST_TTL` and their IPv6 counterparts
///   are exposed by libc. Without it the multicast options are accepted and ignored.
#[rustfmt::skip]
fn collect_select_features(target: &TargetTriplet) {
    if target.os_any(&["linux", "android"]) {
        define("select_updates_timeout");
    }
    if target.os_any(&[
        "linux", "android", "freebsd", "openbsd", "netbsd", "dragonfly", "macos", "ios",
        "solaris", "illumos",
    ]) {
        define("multicast_opts");
    }
}

fn define(cfg: &str) {
    ldefine(&[cfg]);
}
fn ldefine(cfgs: &[&str]) {
    let stdout_ = io::stdout();
    let mut stdout = stdout_.lock();
    for i in cfgs {
        stdout.write_all(b"cargo:rustc-cfg=").unwrap();
        stdout.write_all(i.as_ref()).unwrap();
        stdout.write_all(b"\n").unwrap();
    }
}

struct TargetTriplet {
    os: String,
}
#[rustfmt::skip]
impl TargetTriplet {
    fn fetch() -> Self {
        Self { os: env_var("CARGO_CFG_TARGET_OS").unwrap() }
    }
    fn os_any(&self, oses: &[&str]) -> bool { oses.iter().copied().any(|x| x == self.os) }
}
