fn main() {
    shadow_rs::ShadowBuilder::builder()
        .build()
        .expect("failed to generate build info");
}
