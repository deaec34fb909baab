fn main() {
    if let Err(err) = roundtap_lib::run() {
        log::error!("roundtap exited: {err:#}");
        eprintln!("roundtap exited: {err:#}");
        std::process::exit(1);
    }
}
