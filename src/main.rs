fn main() {
    std::process::exit(snapvault::cli::run());
}
