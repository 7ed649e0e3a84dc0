fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // ESP-IDF link arguments are only needed for the device binary; host
    // builds (tests, fuzzing) skip the embuild step entirely.
    #[cfg(feature = "espidf")]
    embuild::espidf::sysenv::output();
}
