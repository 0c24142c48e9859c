//! World-space transform access through the parent chain.

use super::{NodeId, Scene};
use tandem_shared::{Quaternion, Transform, Vec3};

impl Scene {
    /// Local transform of a node.
    #[must_use]
    pub fn transform(&self, node: NodeId) -> Option<Transform> {
        self.nodes.get(node).map(|n| n.transform)
    }

    /// Replaces a node's local transform.
    pub fn set_transform(&mut self, node: NodeId, transform: Transform) -> bool {
        let Some(n) = self.nodes.get_mut(node) else {
            return false;
        };
        n.transform = transform;
        true
    }

    /// Transform of a node in scene space.
    #[must_use]
    pub fn world_transform(&self, node: NodeId) -> Option<Transform> {
        let n = self.nodes.get(node)?;
        match n.parent {
            Some(parent) => Some(self.world_transform(parent)?.compose(&n.transform)),
            None => Some(n.transform),
        }
    }

    /// Scene-space position of a node.
    #[must_use]
    pub fn world_position(&self, node: NodeId) -> Option<Vec3> {
        self.world_transform(node).map(|t| t.position)
    }

    /// Scene-space rotation of a node.
    #[must_use]
    pub fn world_rotation(&self, node: NodeId) -> Option<Quaternion> {
        self.world_transform(node).map(|t| t.rotation)
    }

    /// Moves a node so that its scene-space position is `position`.
    pub fn set_world_position(&mut self, node: NodeId, position: Vec3) -> bool {
        let local = match self.parent_world(node) {
            Some(Some(parent)) => parent.inverse_transform_point(position),
            Some(None) => position,
            None => return false,
        };
        self.nodes.get_mut(node).map(|n| n.transform.position = local).is_some()
    }

    /// Rotates a node so that its scene-space rotation is `rotation`.
    pub fn set_world_rotation(&mut self, node: NodeId, rotation: Quaternion) -> bool {
        let local = match self.parent_world(node) {
            Some(Some(parent)) => (parent.rotation.conjugate() * rotation).normalized(),
            Some(None) => rotation,
            None => return false,
        };
        self.nodes.get_mut(node).map(|n| n.transform.rotation = local).is_some()
    }

    /// `None` if the node is unknown, `Some(None)` for parentless nodes.
    fn parent_world(&self, node: NodeId) -> Option<Option<Transform>> {
        let n = self.nodes.get(node)?;
        Some(n.parent.and_then(|p| self.world_transform(p)))
    }
}

#[cfg(test)]
mod tests {
    use crate::scene::{Guid, Parent, Scene};
    use tandem_shared::{Quaternion, Transform, Vec3};

    #[test]
    fn test_world_position_through_parent() {
        let mut scene = Scene::new();
        let parent = scene.spawn_node("parent".into(), Guid::from("p"));
        scene.link(parent, Parent::Root).unwrap();
        let child = scene.spawn_node("child".into(), Guid::from("c"));
        scene.link(child, Parent::Node(parent)).unwrap();

        scene.set_transform(
            parent,
            Transform::new(
                Vec3::new(10.0, 0.0, 0.0),
                Quaternion::from_axis_angle(Vec3::Y, std::f32::consts::FRAC_PI_2),
                Vec3::ONE,
            ),
        );
        scene.set_transform(child, Transform::from_position(Vec3::X));

        let world = scene.world_position(child).unwrap();
        assert!(world.distance(Vec3::new(10.0, 0.0, -1.0)) < 1e-4);

        assert!(scene.set_world_position(child, Vec3::new(3.0, 4.0, 5.0)));
        let world = scene.world_position(child).unwrap();
        assert!(world.distance(Vec3::new(3.0, 4.0, 5.0)) < 1e-4);
    }

    #[test]
    fn test_world_rotation_round_trip() {
        let mut scene = Scene::new();
        let parent = scene.spawn_node("parent".into(), Guid::from("p"));
        scene.link(parent, Parent::Root).unwrap();
        let child = scene.spawn_node("child".into(), Guid::from("c"));
        scene.link(child, Parent::Node(parent)).unwrap();
        let mut t = Transform::IDENTITY;
        t.rotation = Quaternion::from_axis_angle(Vec3::Z, 0.5);
        scene.set_transform(parent, t);

        let target = Quaternion::from_axis_angle(Vec3::X, 1.2);
        scene.set_world_rotation(child, target);
        assert!(scene.world_rotation(child).unwrap().angle_to(target) < 1e-3);
    }
}
