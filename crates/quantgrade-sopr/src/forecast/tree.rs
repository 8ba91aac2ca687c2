//! CART regression tree on squared error.
//!
//! Nodes live in a flat arena. Splits are found by sorting the node's rows
//! on each feature and sweeping running sums, so a node costs
//! `O(features * n log n)`.

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf(f64),
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone)]
pub struct RegressionTree {
    nodes: Vec<Node>,
    /// Total weighted impurity decrease per feature, normalised to sum to 1.
    importances: Vec<f64>,
}

struct Split {
    feature: usize,
    threshold: f64,
    gain: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

impl RegressionTree {
    /// Fit on the rows listed in `sample` (duplicates allowed, for bagging).
    pub fn fit(x: &[Vec<f64>], y: &[f64], sample: &[usize], params: TreeParams) -> Self {
        let dim = x.first().map_or(0, Vec::len);
        let mut tree = Self {
            nodes: Vec::new(),
            importances: vec![0.0; dim],
        };
        tree.grow(x, y, sample.to_vec(), 0, params);
        let total: f64 = tree.importances.iter().sum();
        if total > 0.0 {
            for imp in tree.importances.iter_mut() {
                *imp /= total;
            }
        }
        tree
    }

    fn grow(
        &mut self,
        x: &[Vec<f64>],
        y: &[f64],
        rows: Vec<usize>,
        depth: usize,
        params: TreeParams,
    ) -> usize {
        let id = self.nodes.len();
        let mean = rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len().max(1) as f64;
        self.nodes.push(Node::Leaf(mean));

        if depth >= params.max_depth || rows.len() < 2 * params.min_samples_leaf.max(1) {
            return id;
        }
        let Some(split) = best_split(x, y, &rows, params.min_samples_leaf.max(1)) else {
            return id;
        };
        self.importances[split.feature] += split.gain;
        let left = self.grow(x, y, split.left, depth + 1, params);
        let right = self.grow(x, y, split.right, depth + 1, params);
        self.nodes[id] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        id
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut id = 0;
        loop {
            match &self.nodes[id] {
                Node::Leaf(value) => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    pub fn importances(&self) -> &[f64] {
        &self.importances
    }
}

fn best_split(x: &[Vec<f64>], y: &[f64], rows: &[usize], min_leaf: usize) -> Option<Split> {
    let n = rows.len();
    let total_sum: f64 = rows.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = rows.iter().map(|&i| y[i] * y[i]).sum();
    let parent_sse = total_sq - total_sum * total_sum / n as f64;
    if parent_sse <= 1e-12 {
        return None;
    }

    let dim = x[rows[0]].len();
    let mut best: Option<(usize, f64, f64)> = None;
    let mut order = rows.to_vec();
    for feature in 0..dim {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));
        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;
            let n_left = k + 1;
            let n_right = n - n_left;
            if n_left < min_leaf || n_right < min_leaf {
                continue;
            }
            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if next <= here {
                continue;
            }
            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = (left_sq - left_sum * left_sum / n_left as f64)
                + (right_sq - right_sum * right_sum / n_right as f64);
            let gain = parent_sse - sse;
            if best.map_or(true, |(_, _, g)| gain > g) {
                best = Some((feature, (here + next) / 2.0, gain));
            }
        }
    }

    let (feature, threshold, gain) = best?;
    if gain <= 0.0 {
        return None;
    }
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.iter().copied().partition(|&i| x[i][feature] <= threshold);
    Some(Split {
        feature,
        threshold,
        gain,
        left,
        right,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_function_is_learned() {
        let x: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let y: Vec<f64> = (0..40).map(|i| if i < 20 { 1.0 } else { 3.0 }).collect();
        let sample: Vec<usize> = (0..40).collect();
        let tree = RegressionTree::fit(
            &x,
            &y,
            &sample,
            TreeParams {
                max_depth: 3,
                min_samples_leaf: 1,
            },
        );
        assert_eq!(tree.predict(&[5.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[35.0, 0.0]), 3.0);
        assert!(
            tree.importances()[0] > 0.99,
            "only the first feature carries signal: {:?}",
            tree.importances()
        );
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![2.5; 10];
        let sample: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(
            &x,
            &y,
            &sample,
            TreeParams {
                max_depth: 5,
                min_samples_leaf: 1,
            },
        );
        assert_eq!(tree.predict(&[100.0]), 2.5);
        assert_eq!(tree.importances(), &[0.0]);
    }
}
