//! Closed tours from a fixed departure point: nearest neighbour seeding
//! followed by 2-opt improvement.

use orcatrail_core::GeoPoint;

const MAX_PASSES: usize = 64;
const EPSILON_KM: f64 = 1e-9;

/// Visiting order over `points`, as indices, for a loop starting and ending at `depot`.
#[must_use]
pub fn order_stops(depot: GeoPoint, points: &[GeoPoint]) -> Vec<usize> {
    let mut order = nearest_neighbour(depot, points);
    two_opt(depot, points, &mut order);
    order
}

/// Length of the loop `depot -> points[order...] -> depot`.
#[must_use]
pub fn loop_distance(depot: GeoPoint, points: &[GeoPoint], order: &[usize]) -> f64 {
    let mut total = 0.0;
    let mut at = depot;
    for &idx in order {
        total += at.distance_km(&points[idx]);
        at = points[idx];
    }
    total + at.distance_km(&depot)
}

fn nearest_neighbour(depot: GeoPoint, points: &[GeoPoint]) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..points.len()).collect();
    let mut order = Vec::with_capacity(points.len());
    let mut at = depot;
    while !remaining.is_empty() {
        let (slot, _) = remaining
            .iter()
            .enumerate()
            .map(|(slot, &idx)| (slot, at.distance_km(&points[idx])))
            .fold((0, f64::INFINITY), |best, candidate| {
                if candidate.1 < best.1 {
                    candidate
                } else {
                    best
                }
            });
        let next = remaining.swap_remove(slot);
        at = points[next];
        order.push(next);
    }
    order
}

fn two_opt(depot: GeoPoint, points: &[GeoPoint], order: &mut [usize]) {
    if order.len() < 2 {
        return;
    }
    // Position 0 and len+1 of the route are the depot.
    let at = |order: &[usize], pos: usize| -> GeoPoint {
        if pos == 0 || pos > order.len() {
            depot
        } else {
            points[order[pos - 1]]
        }
    };
    for _ in 0..MAX_PASSES {
        let mut improved = false;
        for i in 1..order.len() {
            for k in (i + 1)..=order.len() {
                let (a, b) = (at(order, i - 1), at(order, i));
                let (c, d) = (at(order, k), at(order, k + 1));
                let delta = a.distance_km(&c) + b.distance_km(&d)
                    - a.distance_km(&b)
                    - c.distance_km(&d);
                if delta < -EPSILON_KM {
                    order[i - 1..k].reverse();
                    improved = true;
                }
            }
        }
        if !improved {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depot() -> GeoPoint {
        GeoPoint::new(48.53, -123.08)
    }

    #[test]
    fn empty_and_single_stop() {
        assert!(order_stops(depot(), &[]).is_empty());
        let one = [GeoPoint::new(48.6, -123.08)];
        assert_eq!(order_stops(depot(), &one), vec![0]);
        let there_and_back = loop_distance(depot(), &one, &[0]);
        assert!((there_and_back - 2.0 * depot().distance_km(&one[0])).abs() < 1e-9);
    }

    #[test]
    fn removes_crossings() {
        // Corners of a square visited in a crossing order by a naive route.
        let points = [
            GeoPoint::new(48.60, -123.00),
            GeoPoint::new(48.60, -123.16),
            GeoPoint::new(48.46, -123.00),
            GeoPoint::new(48.46, -123.16),
        ];
        let crossing = loop_distance(depot(), &points, &[0, 3, 1, 2]);
        let order = order_stops(depot(), &points);
        let optimised = loop_distance(depot(), &points, &order);
        assert!(optimised < crossing);
        let mut visited = order.clone();
        visited.sort_unstable();
        assert_eq!(visited, vec![0, 1, 2, 3]);
    }

    #[test]
    fn never_worse_than_nearest_neighbour() {
        let points: Vec<GeoPoint> = (0..8)
            .map(|i| {
                let t = f64::from(i);
                GeoPoint::new(48.4 + (t * 0.37).sin() * 0.2, -123.1 + (t * 0.91).cos() * 0.25)
            })
            .collect();
        let seeded = nearest_neighbour(depot(), &points);
        let improved = order_stops(depot(), &points);
        assert!(
            loop_distance(depot(), &points, &improved)
                <= loop_distance(depot(), &points, &seeded) + 1e-9
        );
    }
}
