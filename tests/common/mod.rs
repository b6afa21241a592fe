use std::sync::Arc;
use std::time::Duration;

use rowcc::{Config, Manager, Protocol, Txn};

pub fn setup_logger() {
    use std::io::Write;

    fn tn() -> String {
        std::thread::current().name().unwrap_or("unknown").to_owned()
    }

    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "{:05} {:20} {:10} {}",
                record.level(),
                tn(),
                record.module_path().unwrap().split("::").last().unwrap(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info);

    if let Ok(env) = std::env::var("RUST_LOG") {
        builder.parse_filters(&env);
    }

    let _r = builder.try_init();
}

#[allow(dead_code)]
pub fn start(protocol: Protocol, threads: usize) -> Arc<Manager> {
    Config::new().threads(threads).protocol(protocol).start().unwrap()
}

/// Waits for a parked transaction, failing the test instead of hanging if
/// nothing ever wakes it.
#[allow(dead_code)]
pub fn wait_for(txn: &Txn) {
    assert!(
        txn.wait_timeout(Duration::from_secs(10)),
        "txn {} at ts {} was never woken",
        txn.id(),
        txn.ts()
    );
}
