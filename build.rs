extern crate configure_me_codegen;

fn main() {
    configure_me_codegen::build_script_auto().unwrap_or_else(|error| {
        println!("Could not generate configuration parser: {}", error);
        std::process::exit(1)
    });
}
