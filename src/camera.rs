//! Simple pinhole camera. The film plane is placed `distance_to_film` in
//! front of the eye, derived from the vertical FOV and the physical film size.

use crate::math::{Ray, Vec2, Vec3};

#[derive(Clone, Debug)]
pub struct Camera {
    pub width: u32,
    pub height: u32,
    pub aspect_ratio: f32,
    pub fov: f32,
    pub film_size: f32,
    pub distance_to_film: f32,
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
    pub right: Vec3,
}

impl Camera {
    /// Create a camera with a vertical FOV in degrees and a film size in
    /// world units. `forward` and `up` are normalized; `right` is derived.
    pub fn new(
        width: u32,
        height: u32,
        fov: f32,
        film_size: f32,
        position: Vec3,
        forward: Vec3,
        up: Vec3,
    ) -> Self {
        let forward = forward.normalized();
        let up = up.normalized();
        Self {
            width,
            height,
            aspect_ratio: width as f32 / height as f32,
            fov,
            film_size,
            distance_to_film: film_size / (2.0 * (fov.to_radians() * 0.5).tan()),
            position,
            forward,
            up,
            right: forward.cross(up).normalized(),
        }
    }

    /// Generate the eye ray through `pixel` (in pixel coordinates; fractions
    /// select positions inside the pixel).
    pub fn eye_ray(&self, pixel: Vec2) -> Ray {
        let w_dir = -self.forward;
        let u_dir = self.right;
        let v_dir = self.up;

        // ピクセル位置をフィルム面上のワールド座標へ
        let im_plane_u_pos = pixel.x / self.width as f32 - 0.5;
        let im_plane_v_pos = pixel.y / self.height as f32 - 0.5;

        let pixel_pos = self.position
            + (self.aspect_ratio * self.film_size * im_plane_u_pos) * u_dir
            + (self.film_size * im_plane_v_pos) * v_dir
            - self.distance_to_film * w_dir;

        Ray::new(self.position, (pixel_pos - self.position).normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_camera() -> Camera {
        Camera::new(
            512,
            384,
            45.0,
            0.032,
            Vec3::new(0.0, 0.0, 1.5),
            Vec3::new(0.0, 0.0, -1.0),
            Vec3::new(0.0, 1.0, 0.0),
        )
    }

    #[test]
    fn center_pixel_looks_forward() {
        let camera = test_camera();
        let ray = camera.eye_ray(Vec2::new(256.0, 192.0));
        assert_eq!(ray.origin, camera.position);
        assert!((ray.direction - camera.forward).length() < 1e-6);
    }

    #[test]
    fn basis_is_orthonormal() {
        let camera = test_camera();
        assert!(camera.forward.dot(camera.up).abs() < 1e-6);
        assert!(camera.forward.dot(camera.right).abs() < 1e-6);
        assert!((camera.right.length() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn distance_to_film_from_fov() {
        let camera = test_camera();
        let expected = 0.032 / (2.0 * (45.0f32.to_radians() * 0.5).tan());
        assert!((camera.distance_to_film - expected).abs() < 1e-7);
    }

    #[test]
    fn corner_rays_diverge() {
        let camera = test_camera();
        let a = camera.eye_ray(Vec2::new(0.0, 0.0)).direction;
        let b = camera.eye_ray(Vec2::new(512.0, 384.0)).direction;
        assert!(a.dot(b) < 1.0 - 1e-4);
    }
}
