/// Turn a list of equal-length columns into a list of rows
///
/// Rows stop at the shortest column.
pub fn transpose_iter<T>(columns: Vec<Vec<T>>) -> impl Iterator<Item = Vec<T>> {
    let len = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut iters = columns.into_iter().map(|c| c.into_iter()).collect::<Vec<_>>();
    (0..len).map(move |_| iters.iter_mut().filter_map(Iterator::next).collect::<Vec<T>>())
}

pub fn transpose<T>(columns: Vec<Vec<T>>) -> Vec<Vec<T>> {
    transpose_iter(columns).collect()
}

/// Cut `column` down to `len`, or extend it with `fill`
///
/// **Returns** whether the column had to be adjusted
pub fn fit_len<T: Clone>(column: &mut Vec<T>, len: usize, fill: T) -> bool {
    if column.len() == len {
        return false;
    }
    column.resize(len, fill);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transpose_functional() {
        let cols = vec![vec![1, 2, 3], vec![4, 5, 6]];
        assert_eq!(transpose(cols), vec![vec![1, 4], vec![2, 5], vec![3, 6]]);
        assert!(transpose::<i32>(vec![]).is_empty(), "no columns, no rows");
        assert!(transpose(vec![Vec::<i32>::new(); 3]).is_empty(), "empty columns, no rows");
    }

    #[test]
    fn fit_len_functional() {
        let mut v = vec![1, 2, 3];
        assert!(!fit_len(&mut v, 3, 0), "untouched");
        assert!(fit_len(&mut v, 5, 0), "padded");
        assert_eq!(v, [1, 2, 3, 0, 0]);
        assert!(fit_len(&mut v, 2, 0), "truncated");
        assert_eq!(v, [1, 2]);
    }
}
