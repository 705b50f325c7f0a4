use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    crossref_audit::app::run_audit(std::env::args().skip(1))
}
