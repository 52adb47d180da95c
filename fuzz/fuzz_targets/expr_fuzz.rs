//! Expression fuzz target: compile arbitrary text and evaluate whatever parses.
//! Neither step may panic; errors come back as EvalError.
//! Build with: cargo fuzz run expr_fuzz (requires nightly and cargo fuzz).

#![cfg_attr(fuzzing, no_main)]

#[cfg(fuzzing)]
use libfuzzer_sys::fuzz_target;

#[cfg(fuzzing)]
fuzz_target!(|data: &[u8]| {
    let s = match std::str::from_utf8(data) {
        Ok(x) => x,
        Err(_) => return,
    };
    if let Ok(node) = devdecl::expr::compile(s) {
        let mut env = devdecl::Environment::new();
        env.bind("value", 7);
        env.bind("count", 3);
        let _ = devdecl::expr::eval(&node, &env);
    }
});

#[cfg(not(fuzzing))]
fn main() {
    eprintln!("Build with: cargo fuzz run expr_fuzz");
}
