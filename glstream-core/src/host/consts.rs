//! EGL and GLES enum values the server interprets itself.

pub mod egl {
    pub const FALSE: i32 = 0;
    pub const TRUE: i32 = 1;

    pub const SUCCESS: i32 = 0x3000;
    pub const NOT_INITIALIZED: i32 = 0x3001;
    pub const BAD_ACCESS: i32 = 0x3002;
    pub const BAD_ALLOC: i32 = 0x3003;
    pub const BAD_ATTRIBUTE: i32 = 0x3004;
    pub const BAD_CONFIG: i32 = 0x3005;
    pub const BAD_CONTEXT: i32 = 0x3006;
    pub const BAD_DISPLAY: i32 = 0x3008;
    pub const BAD_MATCH: i32 = 0x3009;
    pub const BAD_NATIVE_WINDOW: i32 = 0x300B;
    pub const BAD_PARAMETER: i32 = 0x300C;
    pub const BAD_SURFACE: i32 = 0x300D;

    pub const BUFFER_SIZE: i32 = 0x3020;
    pub const ALPHA_SIZE: i32 = 0x3021;
    pub const BLUE_SIZE: i32 = 0x3022;
    pub const GREEN_SIZE: i32 = 0x3023;
    pub const RED_SIZE: i32 = 0x3024;
    pub const DEPTH_SIZE: i32 = 0x3025;
    pub const STENCIL_SIZE: i32 = 0x3026;
    pub const CONFIG_CAVEAT: i32 = 0x3027;
    pub const CONFIG_ID: i32 = 0x3028;
    pub const LEVEL: i32 = 0x3029;
    pub const MAX_PBUFFER_HEIGHT: i32 = 0x302A;
    pub const MAX_PBUFFER_PIXELS: i32 = 0x302B;
    pub const MAX_PBUFFER_WIDTH: i32 = 0x302C;
    pub const NATIVE_RENDERABLE: i32 = 0x302D;
    pub const NATIVE_VISUAL_ID: i32 = 0x302E;
    pub const NATIVE_VISUAL_TYPE: i32 = 0x302F;
    pub const SAMPLES: i32 = 0x3031;
    pub const SAMPLE_BUFFERS: i32 = 0x3032;
    pub const SURFACE_TYPE: i32 = 0x3033;
    pub const TRANSPARENT_TYPE: i32 = 0x3034;
    pub const TRANSPARENT_BLUE_VALUE: i32 = 0x3035;
    pub const TRANSPARENT_GREEN_VALUE: i32 = 0x3036;
    pub const TRANSPARENT_RED_VALUE: i32 = 0x3037;
    pub const NONE: i32 = 0x3038;
    pub const BIND_TO_TEXTURE_RGB: i32 = 0x3039;
    pub const BIND_TO_TEXTURE_RGBA: i32 = 0x303A;
    pub const MIN_SWAP_INTERVAL: i32 = 0x303B;
    pub const MAX_SWAP_INTERVAL: i32 = 0x303C;
    pub const LUMINANCE_SIZE: i32 = 0x303D;
    pub const ALPHA_MASK_SIZE: i32 = 0x303E;
    pub const COLOR_BUFFER_TYPE: i32 = 0x303F;
    pub const RENDERABLE_TYPE: i32 = 0x3040;
    pub const CONFORMANT: i32 = 0x3042;

    pub const VENDOR: u32 = 0x3053;
    pub const VERSION: u32 = 0x3054;
    pub const EXTENSIONS: u32 = 0x3055;
    pub const CLIENT_APIS: u32 = 0x308D;

    pub const HEIGHT: i32 = 0x3056;
    pub const WIDTH: i32 = 0x3057;
    pub const CONTEXT_CLIENT_VERSION: i32 = 0x3098;

    pub const GL_TEXTURE_2D_KHR: u32 = 0x30B1;
    pub const GL_RENDERBUFFER_KHR: u32 = 0x30B9;
    pub const NATIVE_BUFFER_ANDROID: u32 = 0x3140;
}

pub mod gl {
    pub const VENDOR: u32 = 0x1F00;
    pub const RENDERER: u32 = 0x1F01;
    pub const VERSION: u32 = 0x1F02;
    pub const EXTENSIONS: u32 = 0x1F03;

    pub const ALPHA: u32 = 0x1906;
    pub const RGB: u32 = 0x1907;
    pub const RGBA: u32 = 0x1908;
    pub const LUMINANCE: u32 = 0x1909;
    pub const LUMINANCE_ALPHA: u32 = 0x190A;
    pub const RGBA4_OES: u32 = 0x8056;
    pub const RGB5_A1_OES: u32 = 0x8057;
    pub const RGB565_OES: u32 = 0x8D62;

    pub const UNSIGNED_BYTE: u32 = 0x1401;
    pub const FLOAT: u32 = 0x1406;
    pub const UNSIGNED_SHORT_4_4_4_4: u32 = 0x8033;
    pub const UNSIGNED_SHORT_5_5_5_1: u32 = 0x8034;
    pub const UNSIGNED_SHORT_5_6_5: u32 = 0x8363;

    pub const TEXTURE_2D: u32 = 0x0DE1;
    pub const TEXTURE_BINDING_2D: u32 = 0x8069;
    pub const TEXTURE0: u32 = 0x84C0;
    pub const TEXTURE_MAG_FILTER: u32 = 0x2800;
    pub const TEXTURE_MIN_FILTER: u32 = 0x2801;
    pub const TEXTURE_WRAP_S: u32 = 0x2802;
    pub const TEXTURE_WRAP_T: u32 = 0x2803;
    pub const NEAREST: u32 = 0x2600;
    pub const LINEAR: u32 = 0x2601;
    pub const CLAMP_TO_EDGE: u32 = 0x812F;

    pub const UNPACK_ALIGNMENT: u32 = 0x0CF5;
    pub const PACK_ALIGNMENT: u32 = 0x0D05;
    pub const VIEWPORT: u32 = 0x0BA2;

    pub const FRAMEBUFFER: u32 = 0x8D40;
    pub const RENDERBUFFER: u32 = 0x8D41;
    pub const FRAMEBUFFER_BINDING: u32 = 0x8CA6;
    pub const COLOR_ATTACHMENT0: u32 = 0x8CE0;
    pub const FRAMEBUFFER_COMPLETE: u32 = 0x8CD5;

    pub const COLOR_BUFFER_BIT: u32 = 0x4000;
    pub const TRIANGLE_STRIP: u32 = 0x0005;
    pub const BLEND: u32 = 0x0BE2;
    pub const ONE: u32 = 1;
    pub const ONE_MINUS_SRC_ALPHA: u32 = 0x0303;

    pub const FRAGMENT_SHADER: u32 = 0x8B30;
    pub const VERTEX_SHADER: u32 = 0x8B31;
    pub const COMPILE_STATUS: u32 = 0x8B81;
    pub const LINK_STATUS: u32 = 0x8B82;
}
