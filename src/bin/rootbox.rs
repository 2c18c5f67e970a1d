use anyhow::Result;

fn main() -> Result<()> {
    let code = rootbox::cli::run()?;
    std::process::exit(code)
}
