#![forbid(unsafe_code)]

fn main() {
    std::process::exit(tag_query_cli::run());
}
