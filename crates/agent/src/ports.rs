/// Inclusive port range used for ICE candidate allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub min: u16,
    pub max: u16,
}

impl PortRange {
    pub fn new(min: u16, max: u16) -> Option<Self> {
        if min <= max { Some(Self { min, max }) } else { None }
    }

    /// Intersect two ranges; an empty intersection is `None`.
    pub fn intersect(self, other: PortRange) -> Option<PortRange> {
        PortRange::new(self.min.max(other.min), self.max.min(other.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inverted_range_rejected() {
        assert!(PortRange::new(16000, 15000).is_none());
        assert!(PortRange::new(15000, 15000).is_some());
    }

    #[test]
    fn overlap_is_the_tighter_bound_pair() {
        let a = PortRange::new(15550, 15558).unwrap();
        let b = PortRange::new(15555, 15600).unwrap();
        assert_eq!(a.intersect(b), PortRange::new(15555, 15558));
        assert_eq!(b.intersect(a), PortRange::new(15555, 15558));
    }

    #[test]
    fn disjoint_ranges_have_no_intersection() {
        let a = PortRange::new(15550, 15558).unwrap();
        let b = PortRange::new(16000, 16008).unwrap();
        assert!(a.intersect(b).is_none());
    }

    #[test]
    fn touching_ranges_intersect_in_one_port() {
        let a = PortRange::new(15550, 15558).unwrap();
        let b = PortRange::new(15558, 15600).unwrap();
        assert_eq!(a.intersect(b), PortRange::new(15558, 15558));
    }
}
