// rust-embed pulls templates and static assets in at compile time, and Cargo
// does not track those directories on its own. Rerun when they change.

fn main() {
    println!("cargo:rerun-if-changed=src/assets/");
    println!("cargo:rerun-if-changed=templates/");
}
