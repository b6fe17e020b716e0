//! 材质与材质 Morph 系数

use glam::{Vec3, Vec4};

use crate::model::desc::{MaterialDesc, MaterialMorphDesc};

/// 每材质展平后的 float 数
pub const MATERIAL_FACTOR_FLOATS: usize = 28;

/// 材质系数集合
///
/// 既用作 Morph 条目的系数，也用作每材质的乘算 / 加算累加器。
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialFactor {
    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,
    pub texture_factor: Vec4,
    pub sphere_texture_factor: Vec4,
    pub toon_texture_factor: Vec4,
}

impl MaterialFactor {
    /// 加算累加器初值
    pub const ZERO: Self = Self {
        diffuse: Vec4::ZERO,
        specular: Vec3::ZERO,
        specular_power: 0.0,
        ambient: Vec3::ZERO,
        edge_color: Vec4::ZERO,
        edge_size: 0.0,
        texture_factor: Vec4::ZERO,
        sphere_texture_factor: Vec4::ZERO,
        toon_texture_factor: Vec4::ZERO,
    };

    /// 乘算累加器初值：材质基础值，纹理系数为 1
    pub fn from_material(material: &MaterialDesc) -> Self {
        Self {
            diffuse: material.diffuse,
            specular: material.specular,
            specular_power: material.specular_power,
            ambient: material.ambient,
            edge_color: material.edge_color,
            edge_size: material.edge_size,
            texture_factor: Vec4::ONE,
            sphere_texture_factor: Vec4::ONE,
            toon_texture_factor: Vec4::ONE,
        }
    }

    pub fn from_morph_desc(desc: &MaterialMorphDesc) -> Self {
        Self {
            diffuse: desc.diffuse,
            specular: desc.specular,
            specular_power: desc.specular_power,
            ambient: desc.ambient,
            edge_color: desc.edge_color,
            edge_size: desc.edge_size,
            texture_factor: desc.texture_factor,
            sphere_texture_factor: desc.sphere_texture_factor,
            toon_texture_factor: desc.toon_texture_factor,
        }
    }

    /// 乘算：acc = lerp(acc, acc * factor, weight)
    pub fn mul(&mut self, factor: &MaterialFactor, weight: f32) {
        self.diffuse = self.diffuse.lerp(self.diffuse * factor.diffuse, weight);
        self.specular = self.specular.lerp(self.specular * factor.specular, weight);
        self.specular_power = lerp(self.specular_power, self.specular_power * factor.specular_power, weight);
        self.ambient = self.ambient.lerp(self.ambient * factor.ambient, weight);
        self.edge_color = self.edge_color.lerp(self.edge_color * factor.edge_color, weight);
        self.edge_size = lerp(self.edge_size, self.edge_size * factor.edge_size, weight);
        self.texture_factor = self.texture_factor.lerp(self.texture_factor * factor.texture_factor, weight);
        self.sphere_texture_factor = self
            .sphere_texture_factor
            .lerp(self.sphere_texture_factor * factor.sphere_texture_factor, weight);
        self.toon_texture_factor = self
            .toon_texture_factor
            .lerp(self.toon_texture_factor * factor.toon_texture_factor, weight);
    }

    /// 加算：acc += factor * weight
    pub fn add(&mut self, factor: &MaterialFactor, weight: f32) {
        self.diffuse += factor.diffuse * weight;
        self.specular += factor.specular * weight;
        self.specular_power += factor.specular_power * weight;
        self.ambient += factor.ambient * weight;
        self.edge_color += factor.edge_color * weight;
        self.edge_size += factor.edge_size * weight;
        self.texture_factor += factor.texture_factor * weight;
        self.sphere_texture_factor += factor.sphere_texture_factor * weight;
        self.toon_texture_factor += factor.toon_texture_factor * weight;
    }

    /// 展平为 28 个 float
    pub fn to_flat_floats(&self) -> [f32; MATERIAL_FACTOR_FLOATS] {
        [
            self.diffuse.x, self.diffuse.y, self.diffuse.z, self.diffuse.w,
            self.specular.x, self.specular.y, self.specular.z,
            self.specular_power,
            self.ambient.x, self.ambient.y, self.ambient.z,
            self.edge_color.x, self.edge_color.y, self.edge_color.z, self.edge_color.w,
            self.edge_size,
            self.texture_factor.x, self.texture_factor.y, self.texture_factor.z, self.texture_factor.w,
            self.sphere_texture_factor.x, self.sphere_texture_factor.y,
            self.sphere_texture_factor.z, self.sphere_texture_factor.w,
            self.toon_texture_factor.x, self.toon_texture_factor.y,
            self.toon_texture_factor.z, self.toon_texture_factor.w,
        ]
    }
}

#[inline]
fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// 运行时材质
///
/// 基础值来自模型，当前值由 `MorphManager::end_morph_material` 每帧写回。
/// 纹理系数的乘算与加算部分分开保存，由渲染端组合。
#[derive(Clone, Debug)]
pub struct MmdMaterial {
    pub name: String,
    base: MaterialDesc,

    pub diffuse: Vec4,
    pub specular: Vec3,
    pub specular_power: f32,
    pub ambient: Vec3,
    pub edge_color: Vec4,
    pub edge_size: f32,

    pub texture_mul_factor: Vec4,
    pub texture_add_factor: Vec4,
    pub sphere_texture_mul_factor: Vec4,
    pub sphere_texture_add_factor: Vec4,
    pub toon_texture_mul_factor: Vec4,
    pub toon_texture_add_factor: Vec4,
}

impl MmdMaterial {
    pub fn from_desc(desc: &MaterialDesc) -> Self {
        Self {
            name: desc.name.clone(),
            base: desc.clone(),
            diffuse: desc.diffuse,
            specular: desc.specular,
            specular_power: desc.specular_power,
            ambient: desc.ambient,
            edge_color: desc.edge_color,
            edge_size: desc.edge_size,
            texture_mul_factor: Vec4::ONE,
            texture_add_factor: Vec4::ZERO,
            sphere_texture_mul_factor: Vec4::ONE,
            sphere_texture_add_factor: Vec4::ZERO,
            toon_texture_mul_factor: Vec4::ONE,
            toon_texture_add_factor: Vec4::ZERO,
        }
    }

    #[inline]
    pub fn base(&self) -> &MaterialDesc {
        &self.base
    }

    /// 写回本帧的 Morph 结果
    pub(crate) fn apply_factors(&mut self, mul: &MaterialFactor, add: &MaterialFactor) {
        let mut combined = *mul;
        combined.add(add, 1.0);

        self.diffuse = combined.diffuse;
        self.specular = combined.specular;
        self.specular_power = combined.specular_power;
        self.ambient = combined.ambient;
        self.edge_color = combined.edge_color;
        self.edge_size = combined.edge_size;

        self.texture_mul_factor = mul.texture_factor;
        self.texture_add_factor = add.texture_factor;
        self.sphere_texture_mul_factor = mul.sphere_texture_factor;
        self.sphere_texture_add_factor = add.sphere_texture_factor;
        self.toon_texture_mul_factor = mul.toon_texture_factor;
        self.toon_texture_add_factor = add.toon_texture_factor;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn material() -> MaterialDesc {
        MaterialDesc::new("body", Vec4::new(0.8, 0.6, 0.4, 1.0))
    }

    #[test]
    fn test_mul_half_weight() {
        let mut acc = MaterialFactor::from_material(&material());
        let mut factor = MaterialFactor::from_morph_desc(&MaterialMorphDesc::multiply(0));
        factor.diffuse = Vec4::new(0.0, 1.0, 1.0, 1.0);
        acc.mul(&factor, 0.5);
        assert!((acc.diffuse.x - 0.4).abs() < 1e-6);
        assert!((acc.diffuse.y - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_zero_weight_is_identity() {
        let base = MaterialFactor::from_material(&material());
        let mut factor = MaterialFactor::from_morph_desc(&MaterialMorphDesc::add(-1));
        factor.diffuse = Vec4::splat(3.0);
        factor.edge_size = 2.0;

        let mut acc = base;
        acc.mul(&factor, 0.0);
        acc.add(&factor, 0.0);
        assert_eq!(acc, base);
    }

    #[test]
    fn test_apply_factors_keeps_texture_parts_separate() {
        let desc = material();
        let mut mat = MmdMaterial::from_desc(&desc);
        let mul = MaterialFactor::from_material(&desc);
        let mut add = MaterialFactor::ZERO;
        add.diffuse = Vec4::new(0.1, 0.0, 0.0, 0.0);
        add.texture_factor = Vec4::splat(0.25);
        mat.apply_factors(&mul, &add);

        assert!((mat.diffuse.x - 0.9).abs() < 1e-6);
        assert_eq!(mat.texture_mul_factor, Vec4::ONE);
        assert_eq!(mat.texture_add_factor, Vec4::splat(0.25));
        assert_eq!(mat.base().diffuse, desc.diffuse);
    }

    #[test]
    fn test_flat_layout() {
        let flat = MaterialFactor::from_material(&material()).to_flat_floats();
        assert_eq!(flat[0], 0.8);
        assert_eq!(flat[7], 5.0);
        assert_eq!(flat[15], 1.0);
        assert_eq!(flat[27], 1.0);
    }
}
