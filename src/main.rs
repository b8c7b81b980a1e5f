fn main() {
    std::process::exit(reshelf::run());
}
