//! Compositor programs and quad tessellation.

use crate::compositor::Renderable;
use crate::error::HostError;
use crate::host::{GlProgram, HostDriver, HostSurface, NativeWindow, Vertex};

pub const VERTEX_SHADER: &str = "\
attribute vec3 position;
attribute vec2 texcoord;
uniform mat4 screen_to_gl_coords;
uniform mat4 display_transform;
uniform mat4 transform;
uniform vec2 center;
varying vec2 v_texcoord;
void main() {
   vec4 mid = vec4(center, 0.0, 0.0);
   vec4 transformed = (transform * (vec4(position, 1.0) - mid)) + mid;
   gl_Position = display_transform * screen_to_gl_coords * transformed;
   v_texcoord = texcoord;
}
";

pub const DEFAULT_FRAGMENT_SHADER: &str = "\
precision mediump float;
uniform sampler2D tex;
varying vec2 v_texcoord;
void main() {
   gl_FragColor = texture2D(tex, v_texcoord);
}
";

pub const ALPHA_FRAGMENT_SHADER: &str = "\
precision mediump float;
uniform sampler2D tex;
uniform float alpha;
varying vec2 v_texcoord;
void main() {
   vec4 frag = texture2D(tex, v_texcoord);
   gl_FragColor = alpha*frag;
}
";

/// Pass-through vertex stage for full-target copies.
pub const BLIT_VERTEX_SHADER: &str = "\
attribute vec4 position;
attribute vec2 inCoord;
varying lowp vec2 outCoord;
void main(void) {
  gl_Position.x = position.x;
  gl_Position.y = position.y;
  gl_Position.zw = position.zw;
  outCoord = inCoord;
}
";

pub const BLIT_FRAGMENT_SHADER: &str = "\
varying lowp vec2 outCoord;
uniform sampler2D texture;
void main(void) {
  gl_FragColor = texture2D(texture, outCoord);
}
";

/// Programs linked on the display context at startup.
#[derive(Debug, Clone, Copy)]
pub struct Programs {
    pub default: GlProgram,
    pub alpha: GlProgram,
    pub blit: GlProgram,
}

impl Programs {
    /// Link all programs. Call with a context bound.
    pub fn compile(host: &dyn HostDriver) -> Result<Self, HostError> {
        let default = host.create_program(VERTEX_SHADER, DEFAULT_FRAGMENT_SHADER)?;
        let alpha = host.create_program(VERTEX_SHADER, ALPHA_FRAGMENT_SHADER)?;
        let blit = host.create_program(BLIT_VERTEX_SHADER, BLIT_FRAGMENT_SHADER)?;
        Ok(Self {
            default,
            alpha,
            blit,
        })
    }

    /// The program for a layer with the given opacity.
    pub fn for_alpha(&self, alpha: f32) -> GlProgram {
        if alpha < 1.0 {
            self.alpha
        } else {
            self.default
        }
    }

    pub fn delete(&self, host: &dyn HostDriver) {
        for program in [self.default, self.alpha, self.blit] {
            host.delete_program(program);
        }
    }
}

/// Triangle-strip quad covering the renderable's screen rectangle, with
/// texture coordinates taken from its crop over a `width` x `height` buffer.
pub fn tessellate(renderable: &Renderable, width: u32, height: u32) -> [Vertex; 4] {
    let rect = renderable.screen;
    let (l, t, r, b) = (rect.left as f32, rect.top as f32, rect.right as f32, rect.bottom as f32);
    let w = width.max(1) as f32;
    let h = height.max(1) as f32;
    let crop = renderable.crop;
    let (tl, tt) = (crop.left as f32 / w, crop.top as f32 / h);
    let (tr, tb) = (crop.right as f32 / w, crop.bottom as f32 / h);
    [
        Vertex::new(l, t, tl, tt),
        Vertex::new(l, b, tl, tb),
        Vertex::new(r, t, tr, tt),
        Vertex::new(r, b, tr, tb),
    ]
}

/// A host window registered for composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RendererWindow {
    pub native: NativeWindow,
    pub surface: HostSurface,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Rect;

    #[test]
    fn program_choice_follows_alpha() {
        let programs = Programs {
            default: GlProgram(1),
            alpha: GlProgram(2),
            blit: GlProgram(3),
        };
        assert_eq!(programs.for_alpha(1.0), GlProgram(1));
        assert_eq!(programs.for_alpha(0.5), GlProgram(2));
    }

    #[test]
    fn tessellation_maps_crop_to_texcoords() {
        let renderable = Renderable::new("layer", 1, Rect::new(10, 20, 110, 220), Rect::new(0, 0, 50, 100));
        let quad = tessellate(&renderable, 100, 200);
        assert_eq!(quad[0].position, [10.0, 20.0, 0.0]);
        assert_eq!(quad[0].texcoord, [0.0, 0.0]);
        assert_eq!(quad[3].position, [110.0, 220.0, 0.0]);
        assert_eq!(quad[3].texcoord, [0.5, 0.5]);
        assert_eq!(quad[1].position, [10.0, 220.0, 0.0]);
        assert_eq!(quad[2].texcoord, [0.5, 0.0]);
    }

    #[test]
    fn shaders_declare_compositor_uniforms() {
        for name in ["screen_to_gl_coords", "display_transform", "transform", "center"] {
            assert!(VERTEX_SHADER.contains(name));
        }
        assert!(ALPHA_FRAGMENT_SHADER.contains("uniform float alpha"));
        assert!(!DEFAULT_FRAGMENT_SHADER.contains("alpha"));
    }
}
