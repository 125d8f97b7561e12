fn main() {
    if let Err(err) = posefocus_lib::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
