//! Lights
//!
//! The first directional light is the sun: it drives the scene uniform sun
//! terms and the shadow map. Point lights feed the deferred lighting pass.

use crate::foundation::math::{Mat4, Mat4Ext, Vec3};

/// Light types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightType {
    /// Directional light (like sunlight)
    Directional,
    /// Point light (like a lightbulb)
    Point,
}

/// Light source
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    /// Light type
    pub light_type: LightType,
    /// Light position (point lights)
    pub position: Vec3,
    /// Direction the light travels (directional lights)
    pub direction: Vec3,
    /// Light color
    pub color: Vec3,
    /// Light intensity
    pub intensity: f32,
    /// Light range (point lights)
    pub range: f32,
}

impl Light {
    /// Create a directional light
    pub fn directional(direction: Vec3, color: Vec3, intensity: f32) -> Self {
        Self {
            light_type: LightType::Directional,
            position: Vec3::zeros(),
            direction: direction.normalize(),
            color,
            intensity,
            range: 0.0,
        }
    }

    /// Create a point light
    pub fn point(position: Vec3, color: Vec3, intensity: f32, range: f32) -> Self {
        Self {
            light_type: LightType::Point,
            position,
            direction: Vec3::zeros(),
            color,
            intensity,
            range,
        }
    }
}

/// Lighting environment containing multiple lights
#[derive(Debug, Clone, PartialEq)]
pub struct LightingEnvironment {
    /// List of lights in the scene
    pub lights: Vec<Light>,
    /// Ambient light color
    pub ambient_color: Vec3,
    /// Ambient light intensity
    pub ambient_intensity: f32,
    /// Center of the region the sun's shadow map covers
    pub shadow_focus: Vec3,
    /// Radius of the region the sun's shadow map covers
    pub shadow_radius: f32,
}

impl Default for LightingEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl LightingEnvironment {
    /// Create a new empty lighting environment
    pub fn new() -> Self {
        Self {
            lights: Vec::new(),
            ambient_color: Vec3::new(1.0, 1.0, 1.0),
            ambient_intensity: 0.1,
            shadow_focus: Vec3::zeros(),
            shadow_radius: 20.0,
        }
    }

    /// Add a light to the environment
    pub fn add_light(mut self, light: Light) -> Self {
        self.lights.push(light);
        self
    }

    /// Set ambient lighting
    pub fn with_ambient(mut self, color: Vec3, intensity: f32) -> Self {
        self.ambient_color = color;
        self.ambient_intensity = intensity;
        self
    }

    /// Set the region covered by the shadow map
    pub fn with_shadow_bounds(mut self, focus: Vec3, radius: f32) -> Self {
        self.shadow_focus = focus;
        self.shadow_radius = radius;
        self
    }

    /// The sun (first directional light)
    pub fn sun(&self) -> Option<&Light> {
        self.lights.iter().find(|l| l.light_type == LightType::Directional)
    }

    /// All point lights
    pub fn point_lights(&self) -> impl Iterator<Item = &Light> {
        self.lights.iter().filter(|l| l.light_type == LightType::Point)
    }

    /// Orthographic view-projection of the sun covering the shadow bounds
    ///
    /// Identity when there is no sun.
    pub fn sun_view_projection(&self) -> Mat4 {
        let Some(sun) = self.sun() else {
            return Mat4::identity();
        };

        let radius = self.shadow_radius.max(0.01);
        let eye = self.shadow_focus - sun.direction * radius * 2.0;
        // Any up vector that is not parallel to the light direction works.
        let up = if sun.direction.y.abs() > 0.99 { Vec3::z() } else { Vec3::y() };

        let view = Mat4::look_at(eye, self.shadow_focus, up);
        let projection = Mat4::orthographic(-radius, radius, -radius, radius, 0.0, radius * 4.0)
            * Mat4::vulkan_coordinate_transform();
        projection * view
    }
}
