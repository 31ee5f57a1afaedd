use shadow_rs::ShadowBuilder;

fn main() {
    // Generate build metadata for version reporting
    ShadowBuilder::builder()
        .build()
        .expect("Failed to generate build metadata");
}
