pub fn magnitude(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len().min(b.len());
    let mut sum = 0.0;
    let mut i = 0;

    // Unrolling 4
    while i + 3 < n {
        sum += a[i] * b[i] + a[i + 1] * b[i + 1] + a[i + 2] * b[i + 2] + a[i + 3] * b[i + 3];
        i += 4;
    }

    while i < n {
        sum += a[i] * b[i];
        i += 1;
    }

    sum
}

/// Copy of `v` scaled to unit length; zero vectors stay zero.
pub fn normalized(v: &[f32]) -> Vec<f32> {
    let mag = magnitude(v);
    if mag == 0.0 {
        return v.to_vec();
    }
    v.iter().map(|x| x / mag).collect()
}
