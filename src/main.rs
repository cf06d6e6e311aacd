use clap::Parser;
use pubtools_pyxis::cli::{Args, Runner};
use pubtools_pyxis::logging;

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let pyxis = args.command.pyxis();
    logging::init(pyxis.verbose, pyxis.quiet);

    let code = Runner::new(args).run().await;
    std::process::exit(code);
}
