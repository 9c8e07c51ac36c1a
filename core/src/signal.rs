use std::collections::HashMap;

use once_cell::sync::Lazy;

static SIGNAL_NAMES: Lazy<HashMap<i32, &'static str>> = Lazy::new(|| {
    let table: &[(i32, &str)] = &[
        (libc::SIGHUP, "SIGHUP"),
        (libc::SIGINT, "SIGINT"),
        (libc::SIGQUIT, "SIGQUIT"),
        (libc::SIGILL, "SIGILL"),
        (libc::SIGTRAP, "SIGTRAP"),
        (libc::SIGABRT, "SIGABRT"),
        (libc::SIGBUS, "SIGBUS"),
        (libc::SIGFPE, "SIGFPE"),
        (libc::SIGKILL, "SIGKILL"),
        (libc::SIGUSR1, "SIGUSR1"),
        (libc::SIGSEGV, "SIGSEGV"),
        (libc::SIGUSR2, "SIGUSR2"),
        (libc::SIGPIPE, "SIGPIPE"),
        (libc::SIGALRM, "SIGALRM"),
        (libc::SIGTERM, "SIGTERM"),
        (libc::SIGCHLD, "SIGCHLD"),
        (libc::SIGCONT, "SIGCONT"),
        (libc::SIGSTOP, "SIGSTOP"),
        (libc::SIGTSTP, "SIGTSTP"),
        (libc::SIGTTIN, "SIGTTIN"),
        (libc::SIGTTOU, "SIGTTOU"),
        (libc::SIGURG, "SIGURG"),
        (libc::SIGXCPU, "SIGXCPU"),
        (libc::SIGXFSZ, "SIGXFSZ"),
        (libc::SIGVTALRM, "SIGVTALRM"),
        (libc::SIGPROF, "SIGPROF"),
        (libc::SIGWINCH, "SIGWINCH"),
        (libc::SIGIO, "SIGIO"),
        (libc::SIGSYS, "SIGSYS"),
    ];
    table.iter().copied().collect()
});

pub fn signal_name(sig: i32) -> Option<&'static str> {
    SIGNAL_NAMES.get(&sig).copied()
}

/// `SIGSEGV (11)`, or just the number for signals without a known name.
pub fn describe_signal(sig: i32) -> String {
    match signal_name(sig) {
        Some(name) => format!("{} ({})", name, sig),
        None => sig.to_string(),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn describes_known_and_unknown_signals() {
        struct X {
            sig: i32,
            want: String,
        }
        let cases = [
            X {
                sig: libc::SIGSEGV,
                want: format!("SIGSEGV ({})", libc::SIGSEGV),
            },
            X {
                sig: libc::SIGKILL,
                want: "SIGKILL (9)".to_owned(),
            },
            X {
                sig: 250,
                want: "250".to_owned(),
            },
        ];
        for x in cases {
            assert_eq!(dbg!(describe_signal(x.sig)), x.want);
        }
    }
}
