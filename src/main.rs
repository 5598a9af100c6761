fn main() {
    if let Err(err) = focustimer_lib::run() {
        eprintln!("focustimer: {err:#}");
        std::process::exit(1);
    }
}
