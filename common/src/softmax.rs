/// Normalized exponential weights. The max is subtracted before
/// exponentiating so arbitrarily large logits stay finite:
/// (exp(p-max_p))^(1/T) = exp((p-max_p)/T).
pub fn softmax(logits: &[f32], temperature: f32) -> Vec<f32> {
    let max_p = logits.iter().cloned().fold(f32::MIN, f32::max);
    let exponentiated = logits
        .iter()
        .map(|&p| ((p - max_p) / temperature).exp())
        .collect::<Vec<_>>();
    let sum = exponentiated.iter().sum::<f32>();

    exponentiated.iter().map(|p| p / sum).collect()
}
