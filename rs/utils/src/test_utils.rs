use rand::Rng;

// Generate a random vector with a given dimension
pub fn generate_random_vector(dimension: usize) -> Vec<f32> {
    let mut rng = rand::thread_rng();
    generate_random_vector_using(dimension, &mut rng)
}

// Same, but with a caller-supplied generator so tests can be deterministic
pub fn generate_random_vector_using<R: Rng>(dimension: usize, rng: &mut R) -> Vec<f32> {
    let mut vector = vec![];
    for _ in 0..dimension {
        vector.push(rng.gen::<f32>());
    }
    vector
}
