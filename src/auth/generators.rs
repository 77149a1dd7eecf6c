use async_trait::async_trait;

/// Produces a display name when sign-in does not supply one
#[async_trait]
pub trait DisplayNameGenerator: Send + Sync {
    async fn generate(&self) -> String;
}

/// Pet name-based generator, e.g. `quiet-heron`
#[derive(Default)]
pub struct PetNameGenerator;

impl PetNameGenerator {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DisplayNameGenerator for PetNameGenerator {
    async fn generate(&self) -> String {
        petname::Petnames::default().generate_one(2, "-")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn generates_two_part_names() {
        let generator = PetNameGenerator::new();
        let name = generator.generate().await;

        assert!(!name.is_empty());
        assert_eq!(name.split('-').count(), 2);
    }
}
