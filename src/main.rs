use image_mirror::cli::{Args, Runner};
use image_mirror::logging::init_tracing;

#[tokio::main]
async fn main() {
    let args = Args::parse_args().from_env();
    init_tracing(args.verbose);

    let code = Runner::new(args).run().await;
    std::process::exit(code);
}
