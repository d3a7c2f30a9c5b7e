//! HLSL sources for the shape pipeline.
//!
//! The vertex shader expands the unit quad per instance. The pixel shader
//! switches on `shape_type` and produces straight alpha.

/// Vertex shader, `vs_5_0`.
pub const VERTEX_SHADER: &str = r#"
cbuffer vertexBuffer : register(b0)
{
    float4x4 projection_matrix;
};

struct VS_INPUT
{
    float2 quad_pos   : POSITION;
    float2 inst_pos   : TEXCOORD1;
    float2 inst_size  : TEXCOORD2;
    float  inst_rot   : TEXCOORD3;
    float  inst_str   : TEXCOORD4;
    float4 inst_clr   : TEXCOORD5;
    uint   inst_type  : TEXCOORD6;
    float4 inst_uv    : TEXCOORD7;
};

struct PS_INPUT
{
    float4 position   : SV_POSITION;
    float2 local      : TEXCOORD0;
    float2 inst_pos   : TEXCOORD1;
    float2 inst_size  : TEXCOORD2;
    float  inst_str   : TEXCOORD4;
    float4 inst_clr   : TEXCOORD5;
    nointerpolation uint inst_type : TEXCOORD6;
    float4 inst_uv    : TEXCOORD7;
};

PS_INPUT main(VS_INPUT input)
{
    PS_INPUT output;

    float2 origin = input.inst_pos;
    float2 extent = input.inst_size;

    // Lines carry their end point in inst_size; cover the segment's padded
    // bounding box and let the pixel shader pick the pixels.
    if (input.inst_type == 4)
    {
        float pad = max(input.inst_str, 1.0);
        origin = min(input.inst_pos, input.inst_size) - pad;
        extent = abs(input.inst_size - input.inst_pos) + 2.0 * pad;
    }

    float2 local = input.quad_pos * extent;

    if (input.inst_rot != 0.0 && input.inst_type >= 2 && input.inst_type != 4)
    {
        float2 center = extent * 0.5;
        float s = sin(input.inst_rot);
        float c = cos(input.inst_rot);
        float2 d = local - center;
        local = center + float2(d.x * c - d.y * s, d.x * s + d.y * c);
    }

    float2 world = origin + local;

    output.position = mul(projection_matrix, float4(world, 0.0, 1.0));
    output.local = input.quad_pos * input.inst_size;
    output.inst_pos = input.inst_pos;
    output.inst_size = input.inst_size;
    output.inst_str = input.inst_str;
    output.inst_clr = input.inst_clr;
    output.inst_type = input.inst_type;
    output.inst_uv = input.inst_uv;
    return output;
}
"#;

/// Pixel shader, `ps_5_0`.
pub const PIXEL_SHADER: &str = r#"
struct PS_INPUT
{
    float4 position   : SV_POSITION;
    float2 local      : TEXCOORD0;
    float2 inst_pos   : TEXCOORD1;
    float2 inst_size  : TEXCOORD2;
    float  inst_str   : TEXCOORD4;
    float4 inst_clr   : TEXCOORD5;
    nointerpolation uint inst_type : TEXCOORD6;
    float4 inst_uv    : TEXCOORD7;
};

SamplerState sampler0 : register(s0);
Texture2D font_tex : register(t0);

float coverage(float dist)
{
    return saturate(0.5 - dist);
}

float4 main(PS_INPUT input) : SV_Target
{
    float4 clr = input.inst_clr;
    float2 p = input.local;
    float2 size = input.inst_size;
    float alpha = 0.0;

    switch (input.inst_type)
    {
    case 0:
    {
        float2 d = min(p, size - p);
        alpha = coverage(-min(d.x, d.y));
        break;
    }
    case 1:
    {
        float2 d = min(p, size - p);
        float edge = min(d.x, d.y);
        alpha = coverage(edge - max(input.inst_str, 1.0)) * coverage(-edge);
        break;
    }
    case 2:
    {
        float radius = size.x * 0.5;
        alpha = coverage(length(p - size * 0.5) - radius);
        break;
    }
    case 3:
    {
        float radius = size.x * 0.5;
        float dist = length(p - size * 0.5) - radius + input.inst_str * 0.5;
        alpha = coverage(abs(dist) - input.inst_str * 0.5);
        break;
    }
    case 4:
    {
        float2 a = input.inst_pos;
        float2 b = input.inst_size;
        float2 pa = input.position.xy - a;
        float2 ba = b - a;
        float h = saturate(dot(pa, ba) / max(dot(ba, ba), 1e-6));
        float dist = length(pa - ba * h);
        alpha = coverage(dist - max(input.inst_str, 1.0) * 0.5);
        break;
    }
    case 5:
    {
        float2 uv = lerp(input.inst_uv.xy, input.inst_uv.zw, p / max(size, 1e-6));
        float4 texel = font_tex.Sample(sampler0, uv);
        return float4(clr.rgb * texel.rgb, texel.a * clr.a);
    }
    }

    return float4(clr.rgb, clr.a * alpha);
}
"#;
